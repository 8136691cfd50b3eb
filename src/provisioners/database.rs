//! Managed database and its subnet group
//!
//! The provider reports `address` and `port` once the instance is ready; with
//! the echoed `db_name` and `username` those are the connection outputs.

use super::{network, security};
use crate::config::DatabaseConfig;
use declarative::{Address, AttrValue, ResourceSpec};

pub const ENGINE: &str = "postgres";

pub fn database() -> Address {
    Address::new("database", "main")
}

pub fn subnet_group() -> Address {
    Address::new("db_subnet_group", "main")
}

pub fn resources(config: &DatabaseConfig) -> Vec<ResourceSpec> {
    vec![
        ResourceSpec::new("db_subnet_group", "main").attr(
            "subnet_ids",
            AttrValue::List(vec![
                network::public_subnet().attr("id").into(),
                network::private_subnet().attr("id").into(),
            ]),
        ),
        ResourceSpec::new("database", "main")
            .attr("identifier", config.identifier.as_str())
            .attr("engine", ENGINE)
            .attr("engine_version", config.engine_version.as_str())
            .attr("instance_class", config.instance_class.as_str())
            .attr("storage_type", config.storage_type.as_str())
            .attr("allocated_storage", config.allocated_storage)
            .attr("db_name", config.name.as_str())
            .attr("username", config.username.as_str())
            .attr("password", config.password.as_str())
            .attr("port", config.port)
            .attr("db_subnet_group", subnet_group().attr("id"))
            .attr(
                "security_group_ids",
                AttrValue::List(vec![security::db_group().attr("id").into()]),
            )
            .attr("publicly_accessible", false)
            .attr("skip_final_snapshot", true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_database_attributes() {
        let specs = resources(&DatabaseConfig {
            password: "pw".into(),
            ..DatabaseConfig::default()
        });
        let db = specs.iter().find(|s| s.address == database()).unwrap();

        let literal = |key: &str| db.attributes[key].resolve(&|_| None);
        assert_eq!(literal("engine"), Some(json!("postgres")));
        assert_eq!(literal("publicly_accessible"), Some(json!(false)));
        assert_eq!(literal("skip_final_snapshot"), Some(json!(true)));
        assert_eq!(literal("allocated_storage"), Some(json!(20)));
        assert_eq!(literal("db_name"), Some(json!("notes")));
    }

    #[test]
    fn test_database_dependencies() {
        let specs = resources(&DatabaseConfig::default());
        let db = specs.iter().find(|s| s.address == database()).unwrap();
        let deps = db.dependencies();
        assert!(deps.contains(&subnet_group()));
        assert!(deps.contains(&security::db_group()));

        let group = specs.iter().find(|s| s.address == subnet_group()).unwrap();
        assert_eq!(
            group.dependencies().into_iter().collect::<Vec<_>>(),
            vec![network::private_subnet(), network::public_subnet()]
        );
    }
}

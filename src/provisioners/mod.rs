//! Provisioners: the deployment's desired resource set
//!
//! Each provisioner turns its slice of [`DeploymentConfig`] into
//! [`ResourceSpec`]s. Cross-tier wiring happens only through attribute
//! references, so the graph derives ordering on its own:
//!
//! ```text
//! network ── subnets ── db_subnet_group ── database ── bootstrap_payload ── instance
//!    │          └───────────────────────────────────────────────────────────┘
//!    └── security_group.app ── security_group.db ── database
//! ```

pub mod compute;
pub mod database;
pub mod network;
pub mod security;

use crate::config::DeploymentConfig;
use declarative::{AttrValue, ResourceGraph, ResourceSpec, Result};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Whether a field of a resource kind can change without replacement
pub fn supports_in_place(kind: &str, field: &str) -> bool {
    match kind {
        "network" => field == "enable_dns_hostnames",
        "subnet" => field == "map_public_ip_on_launch",
        "route_table" => field == "routes",
        "security_group" => matches!(field, "ingress" | "egress" | "description"),
        "database" => matches!(
            field,
            "instance_class" | "allocated_storage" | "password" | "engine_version"
        ),
        "instance" => matches!(
            field,
            "instance_type" | "security_group_ids" | "user_data"
        ),
        compute::PAYLOAD_KIND => true,
        _ => false,
    }
}

/// The full desired set for one deployment
#[derive(Debug, Clone)]
pub struct Deployment<'a> {
    config: &'a DeploymentConfig,
    caller_ip: Ipv4Addr,
}

impl<'a> Deployment<'a> {
    pub fn new(config: &'a DeploymentConfig, caller_ip: Ipv4Addr) -> Self {
        Self { config, caller_ip }
    }

    pub fn caller_ip(&self) -> Ipv4Addr {
        self.caller_ip
    }

    /// Every declared resource, validated before any provider call
    pub fn resources(&self) -> Result<Vec<ResourceSpec>> {
        self.config.validate()?;
        compute::check_parameters(self.config)?;

        let mut specs = network::resources(&self.config.region);
        specs.extend(security::resources(
            self.config.app.service_port,
            self.config.database.port,
            self.caller_ip,
        ));
        specs.extend(database::resources(&self.config.database));
        specs.extend(compute::resources(self.config)?);

        log::debug!(
            "Declared {} resources for region {}",
            specs.len(),
            self.config.region
        );
        Ok(specs)
    }

    pub fn graph(&self) -> Result<ResourceGraph> {
        ResourceGraph::build(self.resources()?)
    }
}

/// Build a map attribute from literal entries
pub(crate) fn map<const N: usize>(entries: [(&str, AttrValue); N]) -> AttrValue {
    AttrValue::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use declarative::Address;

    fn caller() -> Ipv4Addr {
        Ipv4Addr::new(203, 0, 113, 7)
    }

    #[test]
    fn test_full_resource_set() {
        let config = sample();
        let graph = Deployment::new(&config, caller()).graph().unwrap();
        let addresses: Vec<String> = graph.iter().map(|s| s.address.to_string()).collect();

        for expected in [
            "network.main",
            "subnet.public",
            "subnet.private",
            "internet_gateway.main",
            "route_table.public",
            "route_table_association.public",
            "security_group.app",
            "security_group.db",
            "db_subnet_group.main",
            "database.main",
            "bootstrap_payload.web",
            "instance.web",
        ] {
            assert!(addresses.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(graph.len(), 12);
    }

    #[test]
    fn test_database_precedes_instance() {
        let config = sample();
        let graph = Deployment::new(&config, caller()).graph().unwrap();
        let order = graph.topological_order();
        let position = |a: &Address| order.iter().position(|x| x == a).unwrap();

        let database = database::database();
        let instance = compute::instance();
        assert!(position(&database) < position(&compute::payload()));
        assert!(position(&compute::payload()) < position(&instance));
        assert!(graph.level_of(&database).unwrap() < graph.level_of(&instance).unwrap());
    }

    #[test]
    fn test_invalid_config_fails_before_graph() {
        let mut config = sample();
        config.app.profile.repo_url = String::new();
        let err = Deployment::new(&config, caller()).resources().unwrap_err();
        assert_eq!(err.category(), declarative::ErrorCategory::ConfigValidation);
        assert!(err.to_string().contains("app.repo_url"));
    }

    #[test]
    fn test_in_place_table() {
        assert!(supports_in_place("security_group", "ingress"));
        assert!(supports_in_place("instance", "user_data"));
        assert!(supports_in_place(compute::PAYLOAD_KIND, "service_port"));
        assert!(!supports_in_place("instance", "image_id"));
        assert!(!supports_in_place("network", "cidr_block"));
    }
}

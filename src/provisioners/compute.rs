//! Compute instance and its first-boot payload
//!
//! `bootstrap_payload.web` is a local resource: its attributes are the
//! bootstrap parameters, with the database endpoint referenced from
//! `database.main`. Rendering it yields `rendered`, which the instance takes
//! as `user_data`. The payload therefore cannot be rendered before the
//! database is ready, and the instance cannot be created before the payload.

use super::{database, network, security};
use crate::config::DeploymentConfig;
use declarative::{Address, AttrValue, Error, ResourceSpec, Result};
use serde_json::Value;

pub const PAYLOAD_KIND: &str = "bootstrap_payload";

/// Stand-in endpoint for checks made before the database exists
const PENDING_HOST: &str = "pending.invalid";

pub fn payload() -> Address {
    Address::new(PAYLOAD_KIND, "web")
}

pub fn instance() -> Address {
    Address::new("instance", "web")
}

/// Fail early on parameters the payload could never be rendered from
pub fn check_parameters(config: &DeploymentConfig) -> Result<()> {
    config
        .bootstrap_parameters(PENDING_HOST, config.database.port)
        .validate()
        .map_err(|e| Error::validation(format!("bootstrap parameters: {e}")))
}

fn payload_spec(config: &DeploymentConfig) -> Result<ResourceSpec> {
    let params = config.bootstrap_parameters(PENDING_HOST, config.database.port);
    let Value::Object(fields) = serde_json::to_value(&params)? else {
        return Err(Error::validation("bootstrap parameters are not a table"));
    };

    let db = database::database();
    let spec = fields
        .into_iter()
        .filter(|(key, _)| key != "db_host" && key != "db_port")
        .fold(ResourceSpec::new(PAYLOAD_KIND, "web"), |spec, (key, value)| {
            spec.attr(&key, value)
        });
    Ok(spec
        .attr("db_host", db.attr("address"))
        .attr("db_port", db.attr("port")))
}

pub fn resources(config: &DeploymentConfig) -> Result<Vec<ResourceSpec>> {
    let compute = &config.compute;
    Ok(vec![
        payload_spec(config)?,
        ResourceSpec::new("instance", "web")
            .attr("image_id", compute.image_id.as_str())
            .attr("instance_type", compute.instance_type.as_str())
            .attr("key_name", compute.key_name.as_str())
            .attr("subnet_id", network::public_subnet().attr("id"))
            .attr(
                "security_group_ids",
                AttrValue::List(vec![security::app_group().attr("id").into()]),
            )
            .attr("user_data", payload().attr("rendered"))
            .attr("associate_public_ip", true),
    ])
}

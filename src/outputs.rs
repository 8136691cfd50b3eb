//! Deployment outputs derived from recorded state

use crate::provisioners::{compute, database};
use declarative::RecordedState;
use serde::Serialize;
use serde_json::Value;

/// Values an operator needs after apply; `None` until the resource exists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentOutputs {
    pub service_url: Option<String>,
    pub db_connect: Option<String>,
}

impl DeploymentOutputs {
    pub fn from_state(state: &RecordedState) -> Self {
        Self {
            service_url: service_url(state),
            db_connect: db_connect(state),
        }
    }

    /// `(name, value)` pairs in display order
    pub fn entries(&self) -> Vec<(&'static str, Option<&str>)> {
        vec![
            ("service_url", self.service_url.as_deref()),
            ("db_connect", self.db_connect.as_deref()),
        ]
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `http://<public ip>:<port>/api`
fn service_url(state: &RecordedState) -> Option<String> {
    let ip = text(state.output(&compute::instance(), "public_ip")?)?;
    let port = text(state.output(&compute::payload(), "service_port")?)?;
    Some(format!("http://{ip}:{port}/api"))
}

/// `psql` invocation reaching the database
fn db_connect(state: &RecordedState) -> Option<String> {
    let db = database::database();
    let field = |name: &str| state.output(&db, name).and_then(text);
    Some(format!(
        "psql -h {} -p {} -U {} -d {}",
        field("address")?,
        field("port")?,
        field("username")?,
        field("db_name")?
    ))
}

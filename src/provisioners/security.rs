//! Firewall rule groups
//!
//! The application tier is reachable on the service port from anywhere;
//! everything administrative (SSH, direct database access) is scoped to the
//! operator's discovered address as a single `/32`. The database tier admits
//! the application tier by group reference.

use super::{map, network};
use declarative::{Address, AttrValue, Reference, ResourceSpec};
use std::net::Ipv4Addr;

/// Remote shell port
pub const ADMIN_PORT: u16 = 22;

pub const ANYWHERE: &str = "0.0.0.0/0";

pub fn app_group() -> Address {
    Address::new("security_group", "app")
}

pub fn db_group() -> Address {
    Address::new("security_group", "db")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    All,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::All => "all",
        }
    }
}

/// Where traffic may come from (or go to)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    Cidr(String),
    /// Members of another rule group
    Group(Reference),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRule {
    pub direction: Direction,
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub source: RuleSource,
}

impl SecurityRule {
    pub fn tcp_in(port: u16, source: RuleSource) -> Self {
        Self {
            direction: Direction::Ingress,
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            source,
        }
    }

    pub fn egress_all() -> Self {
        Self {
            direction: Direction::Egress,
            protocol: Protocol::All,
            from_port: 0,
            to_port: 0,
            source: RuleSource::Cidr(ANYWHERE.to_string()),
        }
    }

    /// Attribute form submitted to the provider
    pub fn to_attr(&self) -> AttrValue {
        let source = match &self.source {
            RuleSource::Cidr(cidr) => ("cidr_blocks", AttrValue::from(vec![cidr.clone()])),
            RuleSource::Group(group) => ("source_security_group_id", group.clone().into()),
        };
        map([
            ("protocol", self.protocol.as_str().into()),
            ("from_port", self.from_port.into()),
            ("to_port", self.to_port.into()),
            source,
        ])
    }
}

/// `<ip>/32`
pub fn caller_cidr(ip: Ipv4Addr) -> String {
    format!("{ip}/32")
}

/// Rules of both tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub app: Vec<SecurityRule>,
    pub db: Vec<SecurityRule>,
}

impl SecurityPolicy {
    pub fn new(service_port: u16, db_port: u16, caller: Ipv4Addr) -> Self {
        let admin = || RuleSource::Cidr(caller_cidr(caller));
        Self {
            app: vec![
                SecurityRule::tcp_in(service_port, RuleSource::Cidr(ANYWHERE.to_string())),
                SecurityRule::tcp_in(ADMIN_PORT, admin()),
                SecurityRule::egress_all(),
            ],
            db: vec![
                SecurityRule::tcp_in(db_port, RuleSource::Group(app_group().attr("id"))),
                SecurityRule::tcp_in(db_port, admin()),
                SecurityRule::egress_all(),
            ],
        }
    }
}

fn group(name: &str, description: &str, rules: &[SecurityRule]) -> ResourceSpec {
    let list = |direction: Direction| {
        AttrValue::List(
            rules
                .iter()
                .filter(|r| r.direction == direction)
                .map(SecurityRule::to_attr)
                .collect(),
        )
    };

    ResourceSpec::new("security_group", name)
        .attr("network_id", network::network().attr("id"))
        .attr("description", description)
        .attr("ingress", list(Direction::Ingress))
        .attr("egress", list(Direction::Egress))
}

pub fn resources(service_port: u16, db_port: u16, caller: Ipv4Addr) -> Vec<ResourceSpec> {
    let policy = SecurityPolicy::new(service_port, db_port, caller);
    log::debug!("Administrative rules scoped to {}", caller_cidr(caller));
    vec![
        group("app", "web tier", &policy.app),
        group("db", "database tier", &policy.db),
    ]
}

//! Network topology: one network, a public and a private subnet, an internet
//! gateway and the public route table. No NAT; the private subnet has no
//! egress route.

use super::map;
use declarative::{Address, AttrValue, ResourceSpec};

pub const NETWORK_CIDR: &str = "10.0.0.0/16";
pub const PUBLIC_SUBNET_CIDR: &str = "10.0.1.0/24";
pub const PRIVATE_SUBNET_CIDR: &str = "10.0.2.0/24";
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

pub fn network() -> Address {
    Address::new("network", "main")
}

pub fn public_subnet() -> Address {
    Address::new("subnet", "public")
}

pub fn private_subnet() -> Address {
    Address::new("subnet", "private")
}

pub fn gateway() -> Address {
    Address::new("internet_gateway", "main")
}

pub fn route_table() -> Address {
    Address::new("route_table", "public")
}

/// Number of addresses in an IPv4 CIDR block
pub fn address_count(cidr: &str) -> Option<u64> {
    let (ip, prefix) = cidr.split_once('/')?;
    ip.parse::<std::net::Ipv4Addr>().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    (prefix <= 32).then(|| 1u64 << (32 - prefix))
}

pub fn resources(region: &str) -> Vec<ResourceSpec> {
    let network_id = network().attr("id");

    let subnet = |name: &str, cidr: &str, zone: char, public: bool| {
        ResourceSpec::new("subnet", name)
            .attr("network_id", network_id.clone())
            .attr("cidr_block", cidr)
            .attr("availability_zone", format!("{region}{zone}"))
            .attr("map_public_ip_on_launch", public)
    };

    vec![
        ResourceSpec::new("network", "main")
            .attr("cidr_block", NETWORK_CIDR)
            .attr("enable_dns_hostnames", true)
            .attr("enable_dns_support", true),
        subnet("public", PUBLIC_SUBNET_CIDR, 'a', true),
        subnet("private", PRIVATE_SUBNET_CIDR, 'b', false),
        ResourceSpec::new("internet_gateway", "main").attr("network_id", network_id.clone()),
        ResourceSpec::new("route_table", "public")
            .attr("network_id", network_id)
            .attr(
                "routes",
                AttrValue::List(vec![map([
                    ("cidr_block", DEFAULT_ROUTE.into()),
                    ("gateway_id", gateway().attr("id").into()),
                ])]),
            ),
        ResourceSpec::new("route_table_association", "public")
            .attr("route_table_id", route_table().attr("id"))
            .attr("subnet_id", public_subnet().attr("id")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn find<'a>(specs: &'a [ResourceSpec], address: &Address) -> &'a ResourceSpec {
        specs.iter().find(|s| &s.address == address).unwrap()
    }

    fn literal(spec: &ResourceSpec, key: &str) -> serde_json::Value {
        match &spec.attributes[key] {
            AttrValue::Literal(v) => v.clone(),
            other => panic!("{key} is not a literal: {other:?}"),
        }
    }

    #[test]
    fn test_network_spans_65536_addresses() {
        let specs = resources("eu-west-1");
        let cidr = literal(find(&specs, &network()), "cidr_block");
        assert_eq!(address_count(cidr.as_str().unwrap()), Some(65536));
        assert_eq!(literal(find(&specs, &network()), "enable_dns_hostnames"), json!(true));
    }

    #[test]
    fn test_subnets_in_two_zones() {
        let specs = resources("eu-west-1");
        let public = find(&specs, &public_subnet());
        let private = find(&specs, &private_subnet());

        assert_eq!(literal(public, "availability_zone"), json!("eu-west-1a"));
        assert_eq!(literal(private, "availability_zone"), json!("eu-west-1b"));
        assert_eq!(literal(public, "map_public_ip_on_launch"), json!(true));
        assert_eq!(literal(private, "map_public_ip_on_launch"), json!(false));
        assert_eq!(address_count(PUBLIC_SUBNET_CIDR), Some(256));
    }

    #[test]
    fn test_only_public_subnet_is_routed() {
        let specs = resources("eu-west-1");
        let associations: Vec<_> = specs
            .iter()
            .filter(|s| s.address.kind() == "route_table_association")
            .collect();
        assert_eq!(associations.len(), 1);
        assert!(associations[0].dependencies().contains(&public_subnet()));

        let routes = find(&specs, &route_table());
        assert!(routes.dependencies().contains(&gateway()));
    }

    #[test]
    fn test_address_count_rejects_garbage() {
        assert_eq!(address_count("10.0.0.0"), None);
        assert_eq!(address_count("10.0.0.0/33"), None);
        assert_eq!(address_count("ten/8"), None);
    }
}

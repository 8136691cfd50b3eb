//! Declared resources
//!
//! A [`ResourceSpec`] is the desired shape of one provider object: its
//! address, its attributes and the resources it depends on. Dependencies
//! come from two places: attribute references (`AttrValue::Ref`) and an
//! explicit `depends_on` set for ordering that no attribute expresses.

use crate::types::{Address, AttrValue, Reference};
use std::collections::{BTreeMap, BTreeSet};

/// Desired attributes keyed by name
pub type Attributes = BTreeMap<String, AttrValue>;

/// A declared resource in the desired state
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub address: Address,
    pub attributes: Attributes,
    pub depends_on: BTreeSet<Address>,
}

impl ResourceSpec {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            address: Address::new(kind, name),
            attributes: Attributes::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Set an attribute (builder style)
    pub fn attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Add an explicit ordering dependency
    pub fn depends_on(mut self, address: &Address) -> Self {
        self.depends_on.insert(address.clone());
        self
    }

    /// Reference one of this resource's attributes
    pub fn output(&self, attribute: &str) -> Reference {
        self.address.attr(attribute)
    }

    /// Every attribute reference in declaration order
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.attributes.values() {
            value.references(&mut out);
        }
        out
    }

    /// All resources this one depends on (references plus `depends_on`)
    pub fn dependencies(&self) -> BTreeSet<Address> {
        self.references()
            .into_iter()
            .map(|r| r.address.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_merge_references_and_explicit() {
        let vpc = ResourceSpec::new("network", "main");
        let igw = ResourceSpec::new("internet_gateway", "main");
        let subnet = ResourceSpec::new("subnet", "public")
            .attr("network_id", vpc.output("id"))
            .attr("cidr_block", "10.0.1.0/24")
            .depends_on(&igw.address);

        let deps = subnet.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&vpc.address));
        assert!(deps.contains(&igw.address));
    }

    #[test]
    fn test_literal_only_has_no_dependencies() {
        let spec = ResourceSpec::new("network", "main").attr("cidr_block", "10.0.0.0/16");
        assert!(spec.dependencies().is_empty());
        assert!(spec.references().is_empty());
    }
}

//! Resource dependency graph
//!
//! Edges come from attribute references and explicit `depends_on`. The graph
//! is validated when built (unique addresses, no dangling references, no
//! cycles) and exposes a deterministic topological order plus the dependency
//! levels the executor applies concurrently.

use crate::error::{Error, Result};
use crate::resource::ResourceSpec;
use crate::types::Address;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Dependency map: resource -> the resources it depends on
pub type DependencyMap = BTreeMap<Address, BTreeSet<Address>>;

/// Validated DAG of desired resources
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    specs: BTreeMap<Address, ResourceSpec>,
    dependencies: DependencyMap,
    levels: Vec<Vec<Address>>,
    order: Vec<Address>,
}

impl ResourceGraph {
    /// Build and validate a graph from the full desired set
    pub fn build(specs: Vec<ResourceSpec>) -> Result<Self> {
        let mut by_address = BTreeMap::new();
        for spec in specs {
            let address = spec.address.clone();
            if by_address.insert(address.clone(), spec).is_some() {
                return Err(Error::validation(format!(
                    "resource {address} is declared more than once"
                )));
            }
        }

        let mut dependencies = DependencyMap::new();
        for (address, spec) in &by_address {
            let deps = spec.dependencies();
            for dep in &deps {
                if dep == address {
                    return Err(Error::DependencyCycle {
                        path: vec![address.clone(), address.clone()],
                    });
                }
                if !by_address.contains_key(dep) {
                    return Err(Error::validation(format!(
                        "{address} references undeclared resource {dep}"
                    )));
                }
            }
            dependencies.insert(address.clone(), deps);
        }

        let levels = levels(&dependencies).map_err(|path| Error::DependencyCycle { path })?;
        let order = levels.iter().flatten().cloned().collect();

        log::debug!(
            "Resource graph: {} resources in {} levels",
            by_address.len(),
            levels.len()
        );

        Ok(Self {
            specs: by_address,
            dependencies,
            levels,
            order,
        })
    }

    /// Look up a declared resource
    pub fn get(&self, address: &Address) -> Option<&ResourceSpec> {
        self.specs.get(address)
    }

    /// Whether a resource is declared
    pub fn contains(&self, address: &Address) -> bool {
        self.specs.contains_key(address)
    }

    /// Direct dependencies of a resource
    pub fn dependencies(&self, address: &Address) -> BTreeSet<Address> {
        self.dependencies.get(address).cloned().unwrap_or_default()
    }

    /// Resources that directly depend on `address`
    pub fn dependents(&self, address: &Address) -> Vec<&Address> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(address))
            .map(|(a, _)| a)
            .collect()
    }

    /// Dependencies-first order
    pub fn topological_order(&self) -> &[Address] {
        &self.order
    }

    /// Groups of resources whose dependencies all lie in earlier groups
    pub fn levels(&self) -> &[Vec<Address>] {
        &self.levels
    }

    /// Level index of a resource
    pub fn level_of(&self, address: &Address) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(address))
    }

    /// Iterate resources in topological order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.order.iter().filter_map(|a| self.specs.get(a))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Split a dependency map into levels (Kahn's algorithm, ties by address).
///
/// Dependencies on addresses outside the map are ignored. Returns the cycle
/// path when the map is not acyclic.
pub fn levels(dependencies: &DependencyMap) -> std::result::Result<Vec<Vec<Address>>, Vec<Address>> {
    let mut placed: HashSet<&Address> = HashSet::new();
    let mut levels = Vec::new();

    while placed.len() < dependencies.len() {
        let ready: Vec<Address> = dependencies
            .iter()
            .filter(|(address, _)| !placed.contains(address))
            .filter(|(_, deps)| {
                deps.iter()
                    .all(|d| placed.contains(d) || !dependencies.contains_key(d))
            })
            .map(|(address, _)| address.clone())
            .collect();

        if ready.is_empty() {
            return Err(find_cycle(dependencies, &placed));
        }

        for address in &ready {
            if let Some((key, _)) = dependencies.get_key_value(address) {
                placed.insert(key);
            }
        }
        levels.push(ready);
    }

    Ok(levels)
}

/// Depth-first search over the unplaced nodes for a cycle path
fn find_cycle(dependencies: &DependencyMap, placed: &HashSet<&Address>) -> Vec<Address> {
    fn dfs(
        node: &Address,
        dependencies: &DependencyMap,
        visited: &mut HashSet<Address>,
        path: &mut Vec<Address>,
    ) -> Option<Vec<Address>> {
        if let Some(pos) = path.iter().position(|n| n == node) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(node.clone());
            return Some(cycle);
        }
        if !visited.insert(node.clone()) {
            return None;
        }

        path.push(node.clone());
        if let Some(deps) = dependencies.get(node) {
            for dep in deps {
                if let Some(cycle) = dfs(dep, dependencies, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    for start in dependencies.keys().filter(|a| !placed.contains(a)) {
        let mut path = Vec::new();
        if let Some(cycle) = dfs(start, dependencies, &mut visited, &mut path) {
            return cycle;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tier() -> Vec<ResourceSpec> {
        let vpc = ResourceSpec::new("network", "main").attr("cidr_block", "10.0.0.0/16");
        let subnet = ResourceSpec::new("subnet", "public").attr("network_id", vpc.output("id"));
        let sg = ResourceSpec::new("security_group", "app").attr("network_id", vpc.output("id"));
        let db = ResourceSpec::new("database", "main").attr("security_group", sg.output("id"));
        let instance = ResourceSpec::new("instance", "web")
            .attr("subnet_id", subnet.output("id"))
            .attr("db_host", db.output("address"));
        vec![instance, db, sg, subnet, vpc]
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let graph = ResourceGraph::build(three_tier()).unwrap();
        let order: Vec<String> = graph
            .topological_order()
            .iter()
            .map(ToString::to_string)
            .collect();

        let pos = |a: &str| order.iter().position(|x| x == a).unwrap();
        assert_eq!(pos("network.main"), 0);
        assert!(pos("security_group.app") < pos("database.main"));
        assert!(pos("database.main") < pos("instance.web"));
        assert!(pos("subnet.public") < pos("instance.web"));
    }

    #[test]
    fn test_levels_group_independent_resources() {
        let graph = ResourceGraph::build(three_tier()).unwrap();
        let levels = graph.levels();

        assert_eq!(levels[0], vec![Address::new("network", "main")]);
        assert_eq!(
            levels[1],
            vec![
                Address::new("security_group", "app"),
                Address::new("subnet", "public")
            ]
        );
        assert_eq!(graph.level_of(&Address::new("instance", "web")), Some(3));
    }

    #[test]
    fn test_dependents() {
        let graph = ResourceGraph::build(three_tier()).unwrap();
        let dependents = graph.dependents(&Address::new("network", "main"));
        assert_eq!(dependents.len(), 2);
    }

    #[test]
    fn test_cycle_detected() {
        let a = ResourceSpec::new("a", "one").attr("x", Address::new("b", "two").attr("id"));
        let b = ResourceSpec::new("b", "two").attr("y", Address::new("a", "one").attr("id"));

        let err = ResourceGraph::build(vec![a, b]).unwrap_err();
        match err {
            Error::DependencyCycle { path } => {
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let a = ResourceSpec::new("a", "one").attr("x", Address::new("a", "one").attr("id"));
        assert!(matches!(
            ResourceGraph::build(vec![a]),
            Err(Error::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let a = ResourceSpec::new("a", "one").attr("x", Address::new("missing", "x").attr("id"));
        let err = ResourceGraph::build(vec![a]).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert!(err.to_string().contains("missing.x"));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let a = ResourceSpec::new("a", "one");
        let b = ResourceSpec::new("a", "one");
        assert!(matches!(
            ResourceGraph::build(vec![a, b]),
            Err(Error::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_levels_ignore_external_dependencies() {
        let mut deps = DependencyMap::new();
        deps.insert(
            Address::new("a", "one"),
            [Address::new("gone", "x")].into_iter().collect(),
        );
        let result = levels(&deps).unwrap();
        assert_eq!(result, vec![vec![Address::new("a", "one")]]);
    }
}

//! Plan construction
//!
//! A [`Plan`] is the ordered list of actions that converges recorded state
//! onto the desired graph. Creates, updates and replaces follow dependency
//! order. A resource no longer declared is destroyed after its removed
//! dependents and after every declared resource that still records it as a
//! dependency has been updated or replaced. Each action carries the execution
//! level it belongs to; actions sharing a level are independent of each other.

use crate::diff::{FieldChange, PlannedValue, diff_fields};
use crate::error::{Error, Result};
use crate::graph::{DependencyMap, ResourceGraph, levels};
use crate::provider::Provider;
use crate::state::RecordedState;
use crate::types::{Address, AttributeMap, Reference};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What to do with one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Action {
    Create,
    /// Mutate in place; every changed field supports it
    Update { changes: Vec<FieldChange> },
    /// Destroy then create; at least one changed field forces it
    Replace { changes: Vec<FieldChange> },
    Destroy,
}

impl Action {
    /// Single-character marker used in plan output
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update { .. } => "~",
            Self::Replace { .. } => "-/+",
            Self::Destroy => "-",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update { .. } => "update in-place",
            Self::Replace { .. } => "replace",
            Self::Destroy => "destroy",
        }
    }

    /// Field changes for update/replace
    pub fn changes(&self) -> &[FieldChange] {
        match self {
            Self::Update { changes } | Self::Replace { changes } => changes,
            Self::Create | Self::Destroy => &[],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// An action bound to a resource and an execution level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAction {
    pub address: Address,
    pub action: Action,
    pub level: usize,
}

impl PlannedAction {
    pub fn description(&self) -> String {
        format!("{} {}", self.action.verb(), self.address)
    }
}

/// Counts per action type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.destroy
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Ordered actions converging recorded state onto desired state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
    /// Declared resources that need nothing
    pub unchanged: Vec<Address>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Position of a resource's action in execution order
    pub fn position(&self, address: &Address) -> Option<usize> {
        self.actions.iter().position(|a| &a.address == address)
    }

    pub fn get(&self, address: &Address) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| &a.address == address)
    }

    /// Actions grouped by level, in execution order
    pub fn levels(&self) -> Vec<(usize, Vec<&PlannedAction>)> {
        let mut grouped: BTreeMap<usize, Vec<&PlannedAction>> = BTreeMap::new();
        for action in &self.actions {
            grouped.entry(action.level).or_default().push(action);
        }
        grouped.into_iter().collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for planned in &self.actions {
            match planned.action {
                Action::Create => summary.create += 1,
                Action::Update { .. } => summary.update += 1,
                Action::Replace { .. } => summary.replace += 1,
                Action::Destroy => summary.destroy += 1,
            }
        }
        summary
    }
}

/// How references to a resource resolve while planning
enum Planned {
    /// Recorded outputs stay valid
    Unchanged,
    /// Updated in place: the id and unchanged inputs stay valid
    Updated(BTreeSet<String>),
    /// Created or replaced: nothing is known until apply
    Fresh,
}

/// Diff the desired graph against recorded state
pub fn plan(graph: &ResourceGraph, state: &RecordedState, provider: &dyn Provider) -> Result<Plan> {
    let mut plan = Plan::default();

    let mut planned: BTreeMap<Address, Planned> = BTreeMap::new();

    for spec in graph.iter() {
        let address = &spec.address;
        let lookup = |r: &Reference| resolve_planned(r, state, &planned);
        let desired: BTreeMap<String, Option<Value>> = spec
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve(&lookup)))
            .collect();

        let level = graph.level_of(address).unwrap_or(0);

        let (action, status) = match state.get(address) {
            None => (Some(Action::Create), Planned::Fresh),
            Some(record) if record.tainted => {
                let changes = diff_fields(&desired, &AttributeMap::new());
                (Some(Action::Replace { changes }), Planned::Fresh)
            }
            Some(record) => {
                let changes = diff_fields(&desired, &record.inputs);
                if changes.is_empty() {
                    (None, Planned::Unchanged)
                } else if changes
                    .iter()
                    .all(|c| provider.supports_in_place(address.kind(), &c.field))
                {
                    let fields = changes.iter().map(|c| c.field.clone()).collect();
                    (Some(Action::Update { changes }), Planned::Updated(fields))
                } else {
                    (Some(Action::Replace { changes }), Planned::Fresh)
                }
            }
        };

        match action {
            Some(action) => {
                log::debug!("Planned {} {}", action.verb(), address);
                plan.actions.push(PlannedAction {
                    address: address.clone(),
                    action,
                    level,
                });
            }
            None => plan.unchanged.push(address.clone()),
        }
        planned.insert(address.clone(), status);
    }

    let removed: BTreeSet<Address> = state
        .addresses()
        .filter(|a| !graph.contains(a))
        .cloned()
        .collect();
    let mut actions = destroy_removed(state, &removed, &plan.actions)?;
    actions.append(&mut plan.actions);
    actions.sort_by_key(|a| a.level);
    plan.actions = actions;

    Ok(plan)
}

/// Destroys of `removed`, each levelled after its removed dependents and
/// after the planned changes of declared resources recorded as depending on it
fn destroy_removed(
    state: &RecordedState,
    removed: &BTreeSet<Address>,
    changes: &[PlannedAction],
) -> Result<Vec<PlannedAction>> {
    let mut earliest: BTreeMap<&Address, usize> = BTreeMap::new();
    for change in changes {
        let Some(record) = state.get(&change.address) else {
            continue;
        };
        for dependency in record.dependencies.iter().filter(|d| removed.contains(*d)) {
            let level = earliest.entry(dependency).or_default();
            *level = (*level).max(change.level + 1);
        }
    }

    let mut levels: BTreeMap<Address, usize> = BTreeMap::new();
    let mut destroys = Vec::new();
    for address in destroy_order(state, removed)?.into_iter().flatten() {
        let after_dependents = removed
            .iter()
            .filter(|other| {
                state
                    .get(other)
                    .is_some_and(|r| r.dependencies.contains(&address))
            })
            .filter_map(|other| levels.get(other))
            .map(|level| level + 1)
            .max()
            .unwrap_or(0);
        let level = after_dependents.max(earliest.get(&address).copied().unwrap_or(0));
        levels.insert(address.clone(), level);
        destroys.push(PlannedAction {
            address,
            action: Action::Destroy,
            level,
        });
    }
    Ok(destroys)
}

/// Plan the removal of every recorded resource
pub fn plan_destroy(state: &RecordedState) -> Result<Plan> {
    let all: BTreeSet<Address> = state.addresses().cloned().collect();
    let mut plan = Plan::default();
    for (level, addresses) in destroy_order(state, &all)?.into_iter().enumerate() {
        for address in addresses {
            plan.actions.push(PlannedAction {
                address,
                action: Action::Destroy,
                level,
            });
        }
    }
    Ok(plan)
}

/// Levels for destroying `targets`: dependents strictly before dependencies
fn destroy_order(state: &RecordedState, targets: &BTreeSet<Address>) -> Result<Vec<Vec<Address>>> {
    let deps: DependencyMap = targets
        .iter()
        .map(|a| {
            let recorded = state
                .get(a)
                .map(|r| r.dependencies.clone())
                .unwrap_or_default();
            (a.clone(), recorded)
        })
        .collect();

    let mut ordered = levels(&deps).map_err(|path| Error::DependencyCycle { path })?;
    ordered.reverse();
    Ok(ordered)
}

fn resolve_planned(
    reference: &Reference,
    state: &RecordedState,
    planned: &BTreeMap<Address, Planned>,
) -> Option<Value> {
    let recorded = || {
        state
            .output(&reference.address, &reference.attribute)
            .cloned()
    };

    match planned.get(&reference.address) {
        Some(Planned::Fresh) => None,
        Some(Planned::Updated(changed)) => {
            let is_input = state
                .get(&reference.address)
                .is_some_and(|r| r.inputs.contains_key(&reference.attribute));
            if reference.attribute == "id" || (is_input && !changed.contains(&reference.attribute))
            {
                recorded()
            } else {
                None
            }
        }
        Some(Planned::Unchanged) | None => recorded(),
    }
}

/// Fields whose planned value is still unknown
pub fn unknown_fields(changes: &[FieldChange]) -> Vec<&str> {
    changes
        .iter()
        .filter(|c| c.after == PlannedValue::Unknown)
        .map(|c| c.field.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use crate::resource::ResourceSpec;
    use crate::state::ResourceRecord;
    use chrono::Utc;
    use serde_json::json;

    fn specs(port: u16) -> Vec<ResourceSpec> {
        let vpc = ResourceSpec::new("network", "main").attr("cidr_block", "10.0.0.0/16");
        let sg = ResourceSpec::new("security_group", "app")
            .attr("network_id", vpc.output("id"))
            .attr("port", port);
        let db = ResourceSpec::new("database", "main").attr("engine", "postgres");
        let instance = ResourceSpec::new("instance", "web")
            .attr("security_group", sg.output("id"))
            .attr("db_host", db.output("address"))
            .attr("image_id", "ami-1");
        vec![vpc, sg, db, instance]
    }

    fn record(id: &str, inputs: AttributeMap, deps: &[Address]) -> ResourceRecord {
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), json!(id));
        outputs.insert("address".into(), json!("db.internal"));
        ResourceRecord {
            id: id.into(),
            inputs,
            outputs,
            dependencies: deps.iter().cloned().collect(),
            tainted: false,
            updated_at: Utc::now(),
        }
    }

    /// Record every spec as if applied with its current attributes
    fn converged(graph: &ResourceGraph) -> RecordedState {
        let mut state = RecordedState::default();
        for spec in graph.iter() {
            let lookup = |r: &Reference| state.output(&r.address, &r.attribute).cloned();
            let inputs: AttributeMap = spec
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.resolve(&lookup).unwrap()))
                .collect();
            let deps: Vec<Address> = graph.dependencies(&spec.address).into_iter().collect();
            let rec = record(&format!("{}-1", spec.address.kind()), inputs, &deps);
            state.upsert(spec.address.clone(), rec);
        }
        state
    }

    #[test]
    fn test_empty_state_creates_everything_in_order() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let plan = plan(&graph, &RecordedState::default(), &MemoryProvider::new()).unwrap();

        assert_eq!(plan.summary().create, 4);
        let db = plan.position(&Address::new("database", "main")).unwrap();
        let web = plan.position(&Address::new("instance", "web")).unwrap();
        assert!(db < web);
        assert!(plan.get(&Address::new("instance", "web")).unwrap().level > 0);
    }

    #[test]
    fn test_converged_state_yields_empty_plan() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let state = converged(&graph);
        let plan = plan(&graph, &state, &MemoryProvider::new()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged.len(), 4);
    }

    #[test]
    fn test_in_place_change_is_update_and_keeps_dependents() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let state = converged(&graph);

        let changed = ResourceGraph::build(specs(9000)).unwrap();
        let provider = MemoryProvider::new().with_in_place("security_group", &["port"]);
        let plan = plan(&changed, &state, &provider).unwrap();

        assert_eq!(plan.len(), 1);
        let action = &plan.actions[0];
        assert_eq!(action.address, Address::new("security_group", "app"));
        assert!(matches!(action.action, Action::Update { .. }));
        assert_eq!(action.action.changes()[0].after, PlannedValue::Known(json!(9000)));
    }

    #[test]
    fn test_forced_change_replaces_and_cascades() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let state = converged(&graph);

        let changed = ResourceGraph::build(specs(9000)).unwrap();
        let provider = MemoryProvider::new().with_in_place("instance", &["security_group"]);
        let plan = plan(&changed, &state, &provider).unwrap();

        let sg = plan.get(&Address::new("security_group", "app")).unwrap();
        assert!(matches!(sg.action, Action::Replace { .. }));

        let web = plan.get(&Address::new("instance", "web")).unwrap();
        match &web.action {
            Action::Update { changes } => {
                assert_eq!(unknown_fields(changes), vec!["security_group"]);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_removed_resources_destroyed_dependents_first() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let state = converged(&graph);

        let only_db = ResourceGraph::build(vec![
            ResourceSpec::new("database", "main").attr("engine", "postgres"),
        ])
        .unwrap();
        let plan = plan(&only_db, &state, &MemoryProvider::new()).unwrap();

        assert_eq!(plan.summary().destroy, 3);
        let web = plan.position(&Address::new("instance", "web")).unwrap();
        let sg = plan.position(&Address::new("security_group", "app")).unwrap();
        let vpc = plan.position(&Address::new("network", "main")).unwrap();
        assert!(web < sg && sg < vpc);
        assert_eq!(plan.unchanged, vec![Address::new("database", "main")]);
    }

    #[test]
    fn test_removed_dependency_destroyed_after_dependent_update() {
        let legacy = ResourceSpec::new("security_group", "legacy").attr("port", 22u16);
        let mut before = specs(8000);
        let web = before.pop().unwrap().attr("legacy_group", legacy.output("id"));
        before.push(legacy);
        before.push(web);
        let state = converged(&ResourceGraph::build(before).unwrap());

        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let provider = MemoryProvider::new().with_in_place("instance", &["legacy_group"]);
        let plan = plan(&graph, &state, &provider).unwrap();

        let web = plan.get(&Address::new("instance", "web")).unwrap();
        assert!(matches!(web.action, Action::Update { .. }));
        let legacy = plan.get(&Address::new("security_group", "legacy")).unwrap();
        assert_eq!(legacy.action, Action::Destroy);
        assert!(legacy.level > web.level);
        assert!(plan.position(&legacy.address) > plan.position(&web.address));
    }

    #[test]
    fn test_tainted_record_is_replaced() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let mut state = converged(&graph);
        let db = Address::new("database", "main");
        let mut rec = state.get(&db).unwrap().clone();
        rec.tainted = true;
        state.upsert(db.clone(), rec);

        let plan = plan(&graph, &state, &MemoryProvider::new()).unwrap();
        assert!(matches!(plan.get(&db).unwrap().action, Action::Replace { .. }));
        // instance reads database.address, which is unknown until the replace
        assert!(plan.get(&Address::new("instance", "web")).is_some());
    }

    #[test]
    fn test_plan_destroy_reverses_dependency_order() {
        let graph = ResourceGraph::build(specs(8000)).unwrap();
        let state = converged(&graph);
        let plan = plan_destroy(&state).unwrap();

        assert_eq!(plan.len(), 4);
        let forward = graph.topological_order();
        for (i, earlier) in forward.iter().enumerate() {
            for later in &forward[i + 1..] {
                if graph.dependencies(later).contains(earlier) {
                    assert!(plan.position(later) < plan.position(earlier));
                }
            }
        }
    }
}

//! # Declarative
//!
//! A dependency-aware convergence engine for provisioned resources.
//!
//! Desired resources are declared as [`ResourceSpec`]s whose attributes may
//! reference other resources' outputs. The engine builds a validated
//! [`ResourceGraph`], diffs it against [`RecordedState`] into a [`Plan`], and
//! an [`Executor`] drives a [`Provider`] through that plan level by level.
//!
//! ## Core Concepts
//!
//! - **ResourceSpec**: desired attributes of one resource, addressed `kind.name`
//! - **ResourceGraph**: the DAG induced by references and explicit dependencies
//! - **Plan**: ordered create/update/replace/destroy actions
//! - **Executor**: applies a plan with bounded parallelism, committing state
//!   after every completed action
//!
//! ## Example
//!
//! ```
//! use declarative::{
//!     AutoConfirm, Executor, MemoryProvider, NoProgress, ResourceGraph, ResourceSpec,
//!     StateStore, plan,
//! };
//!
//! # fn main() -> declarative::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let store = StateStore::new(dir.path());
//! let provider = MemoryProvider::new();
//!
//! let network = ResourceSpec::new("network", "main").attr("cidr_block", "10.0.0.0/16");
//! let subnet = ResourceSpec::new("subnet", "public")
//!     .attr("network_id", network.output("id"))
//!     .attr("cidr_block", "10.0.1.0/24");
//! let graph = ResourceGraph::build(vec![network, subnet])?;
//!
//! let mut lock = store.lock()?;
//! let plan = plan(&graph, lock.state(), &provider)?;
//! let summary = Executor::new(&graph, &provider).execute(
//!     &plan,
//!     &mut lock,
//!     &mut NoProgress,
//!     &mut AutoConfirm,
//! )?;
//! assert_eq!(summary.created, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Provider`]: the provisioning backend
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmations
//! - [`RetryCallback`]: observes readiness polling
//!
//! This keeps the engine free of any particular cloud API or terminal UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{FieldChange, PlannedValue, diff_fields, display_value};
pub use error::{Error, ErrorCategory, Result};
pub use executor::Executor;
pub use graph::{DependencyMap, ResourceGraph};
pub use planner::{Action, Plan, PlanSummary, PlannedAction, plan, plan_destroy, unknown_fields};
pub use provider::{MemoryProvider, Provider, ProviderError};
pub use resource::{Attributes, ResourceSpec};
pub use retry::{LogCallback, RetryCallback, RetryConfig, with_retry};
pub use state::{RecordedState, ResourceRecord, StateLock, StateStore};
pub use types::{
    Address, ApplyResult, AttrValue, AttributeMap, ExecuteOptions, ExecuteSummary,
    ProviderRecord, Reference, ResourceStatus,
};

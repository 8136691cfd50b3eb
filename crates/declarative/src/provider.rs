//! Provider trait and an in-memory implementation
//!
//! A provider is the generic provisioning interface the engine drives: submit
//! desired attributes, receive an identifier, a status and runtime attributes.
//!
//! # Testing
//!
//! Use [`MemoryProvider`] to exercise plans without a cloud account:
//!
//! ```
//! use declarative::{Address, MemoryProvider, Provider, ResourceStatus};
//! use serde_json::{json, Map};
//!
//! let provider = MemoryProvider::new().with_computed("database", "address", json!("db.local"));
//! let record = provider
//!     .create(&Address::new("database", "main"), &Map::new())
//!     .unwrap();
//! assert_eq!(record.status, ResourceStatus::Ready);
//! assert_eq!(record.attributes["address"], json!("db.local"));
//! ```

use crate::types::{Address, AttributeMap, ProviderRecord, ResourceStatus};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

/// Errors reported by a provider
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider refused the request (bad attributes, quota, ...)
    #[error("rejected: {0}")]
    Rejected(String),

    /// The resource no longer exists
    #[error("not found: {0}")]
    NotFound(String),

    /// The request did not reach the provider or its answer was unreadable
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Whether repeating the same read could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Generic provisioning interface
pub trait Provider: Send + Sync {
    /// Submit a new resource
    fn create(
        &self,
        address: &Address,
        attributes: &AttributeMap,
    ) -> Result<ProviderRecord, ProviderError>;

    /// Read the current status and runtime attributes
    fn read(&self, address: &Address, id: &str) -> Result<ProviderRecord, ProviderError>;

    /// Mutate an existing resource in place
    fn update(
        &self,
        address: &Address,
        id: &str,
        attributes: &AttributeMap,
    ) -> Result<ProviderRecord, ProviderError>;

    /// Remove a resource
    fn delete(&self, address: &Address, id: &str) -> Result<(), ProviderError>;

    /// Whether `field` of `kind` can change without replacing the resource
    fn supports_in_place(&self, _kind: &str, _field: &str) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: u64,
    resources: HashMap<String, ProviderRecord>,
    pending_reads: HashMap<String, u32>,
    journal: Vec<String>,
}

/// In-process provider backed by a map
///
/// Resources become ready immediately unless configured with
/// [`MemoryProvider::with_pending_reads`]. Every mutating call is appended to
/// a journal so tests can assert on ordering.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<MemoryInner>,
    computed: BTreeMap<String, BTreeMap<String, Value>>,
    in_place: BTreeMap<String, BTreeSet<String>>,
    pending: BTreeMap<String, u32>,
    rejections: Vec<(String, String, Value)>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `attribute = value` for every resource of `kind`
    pub fn with_computed(mut self, kind: &str, attribute: &str, value: Value) -> Self {
        self.computed
            .entry(kind.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
        self
    }

    /// Allow in-place updates of these fields of `kind`
    pub fn with_in_place(mut self, kind: &str, fields: &[&str]) -> Self {
        self.in_place
            .entry(kind.to_string())
            .or_default()
            .extend(fields.iter().map(ToString::to_string));
        self
    }

    /// New resources of `kind` stay pending for this many reads
    pub fn with_pending_reads(mut self, kind: &str, reads: u32) -> Self {
        self.pending.insert(kind.to_string(), reads);
        self
    }

    /// Reject creation of `kind` when `field` equals `value`
    pub fn with_rejection(mut self, kind: &str, field: &str, value: Value) -> Self {
        self.rejections
            .push((kind.to_string(), field.to_string(), value));
        self
    }

    /// Mutating calls in the order they were made, e.g. `create database.main`
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// Number of live resources
    pub fn live_count(&self) -> usize {
        self.lock().resources.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn outputs(&self, kind: &str, id: &str, attributes: &AttributeMap) -> AttributeMap {
        let mut outputs = attributes.clone();
        outputs.insert("id".to_string(), Value::String(id.to_string()));
        if let Some(computed) = self.computed.get(kind) {
            for (k, v) in computed {
                outputs.insert(k.clone(), v.clone());
            }
        }
        outputs
    }

    fn check_rejections(&self, address: &Address, attributes: &AttributeMap) -> Result<(), ProviderError> {
        for (kind, field, value) in &self.rejections {
            if kind == address.kind() && attributes.get(field) == Some(value) {
                return Err(ProviderError::Rejected(format!(
                    "invalid {field} {value} for {address}"
                )));
            }
        }
        Ok(())
    }
}

impl Provider for MemoryProvider {
    fn create(
        &self,
        address: &Address,
        attributes: &AttributeMap,
    ) -> Result<ProviderRecord, ProviderError> {
        self.check_rejections(address, attributes)?;

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("{}-{:04}", address.kind(), inner.next_id);
        let pending = self.pending.get(address.kind()).copied().unwrap_or(0);

        let record = ProviderRecord {
            id: id.clone(),
            status: if pending > 0 {
                ResourceStatus::Pending
            } else {
                ResourceStatus::Ready
            },
            attributes: self.outputs(address.kind(), &id, attributes),
            message: None,
        };
        inner.resources.insert(id.clone(), record.clone());
        inner.pending_reads.insert(id, pending);
        inner.journal.push(format!("create {address}"));
        Ok(record)
    }

    fn read(&self, address: &Address, id: &str) -> Result<ProviderRecord, ProviderError> {
        let mut inner = self.lock();
        let remaining = inner.pending_reads.get(id).copied().unwrap_or(0);
        if remaining > 0 {
            inner.pending_reads.insert(id.to_string(), remaining - 1);
        }

        let record = inner
            .resources
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("{address} ({id})")))?;
        if remaining <= 1 {
            record.status = ResourceStatus::Ready;
        }
        Ok(record.clone())
    }

    fn update(
        &self,
        address: &Address,
        id: &str,
        attributes: &AttributeMap,
    ) -> Result<ProviderRecord, ProviderError> {
        let outputs = self.outputs(address.kind(), id, attributes);
        let mut inner = self.lock();
        let record = inner
            .resources
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("{address} ({id})")))?;
        record.attributes = outputs;
        record.status = ResourceStatus::Ready;
        let record = record.clone();
        inner.journal.push(format!("update {address}"));
        Ok(record)
    }

    fn delete(&self, address: &Address, id: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner
            .resources
            .remove(id)
            .ok_or_else(|| ProviderError::NotFound(format!("{address} ({id})")))?;
        inner.journal.push(format!("delete {address}"));
        Ok(())
    }

    fn supports_in_place(&self, kind: &str, field: &str) -> bool {
        self.in_place
            .get(kind)
            .is_some_and(|fields| fields.contains(field))
    }
}

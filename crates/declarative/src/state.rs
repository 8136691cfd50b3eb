//! Recorded state store
//!
//! The recorded state is the only persisted artifact of a convergence run:
//! for every resource the provider has created, what we submitted (inputs),
//! what it reported (outputs) and what it depended on. Writers hold an
//! exclusive lock file for the whole run and commit after every completed
//! action, so an interrupted run leaves exactly the completed subset recorded.

use crate::error::{Error, Result};
use crate::types::{Address, AttributeMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Current on-disk format version
pub const STATE_VERSION: u32 = 1;

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// Last-known attributes of one provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Provider-assigned identifier
    pub id: String,
    /// Resolved attributes last submitted
    #[serde(default)]
    pub inputs: AttributeMap,
    /// Attributes last reported by the provider
    #[serde(default)]
    pub outputs: AttributeMap,
    /// Resources this one depended on when applied
    #[serde(default)]
    pub dependencies: BTreeSet<Address>,
    /// Created but never reported ready; replaced on the next apply
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
    pub updated_at: DateTime<Utc>,
}

/// All recorded resources of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedState {
    pub version: u32,
    /// Incremented on every commit
    pub serial: u64,
    /// Identifies one deployment across serials; set on first commit
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub resources: BTreeMap<Address, ResourceRecord>,
    pub last_updated: DateTime<Utc>,
}

impl Default for RecordedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl RecordedState {
    pub fn get(&self, address: &Address) -> Option<&ResourceRecord> {
        self.resources.get(address)
    }

    /// A recorded output attribute
    pub fn output(&self, address: &Address, attribute: &str) -> Option<&Value> {
        self.resources
            .get(address)
            .and_then(|r| r.outputs.get(attribute))
    }

    pub fn upsert(&mut self, address: Address, record: ResourceRecord) {
        self.resources.insert(address, record);
    }

    pub fn remove(&mut self, address: &Address) -> Option<ResourceRecord> {
        self.resources.remove(address)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.resources.keys()
    }
}

/// File-backed store for [`RecordedState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Whether a state file has been written
    pub fn exists(&self) -> bool {
        self.state_file().exists()
    }

    /// Read the state without taking the lock (for plan and output)
    pub fn load(&self) -> Result<RecordedState> {
        let path = self.state_file();
        if !path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(RecordedState::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let state: RecordedState =
            serde_json::from_str(&content).map_err(|e| Error::StateCorrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if state.version > STATE_VERSION {
            return Err(Error::StateCorrupt {
                path,
                message: format!(
                    "written by a newer version (format {}, supported {})",
                    state.version, STATE_VERSION
                ),
            });
        }

        log::debug!(
            "Loaded state serial {} with {} resources from {}",
            state.serial,
            state.resources.len(),
            path.display()
        );
        Ok(state)
    }

    /// Take the single-writer lock and load the state
    pub fn lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let lock_path = self.lock_file();
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&lock_path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown holder".to_string());
                return Err(Error::StateLocked { holder, lock_path });
            }
            Err(e) => return Err(Error::io(&lock_path, e)),
        };

        let holder = format!("pid {} since {}", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(holder.as_bytes())
            .map_err(|e| Error::io(&lock_path, e))?;

        let guard = LockGuard {
            path: lock_path,
            _file: file,
        };
        let state = self.load()?;

        Ok(StateLock {
            store: self.clone(),
            state,
            _guard: guard,
        })
    }
}

/// Removes the lock file when dropped
#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
    _file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release state lock {}: {}", self.path.display(), e);
        }
    }
}

/// Exclusive, writable view of the recorded state
#[derive(Debug)]
pub struct StateLock {
    store: StateStore,
    state: RecordedState,
    _guard: LockGuard,
}

impl StateLock {
    pub fn state(&self) -> &RecordedState {
        &self.state
    }

    /// Apply a mutation and persist it before returning
    pub fn commit<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut RecordedState),
    {
        let mut next = self.state.clone();
        mutate(&mut next);
        next.serial = self.state.serial + 1;
        next.last_updated = Utc::now();
        if next.lineage.is_empty() {
            next.lineage = format!(
                "{}-{}",
                next.last_updated.format("%Y%m%dT%H%M%S"),
                std::process::id()
            );
        }

        write_atomic(&self.store.state_file(), &serde_json::to_vec_pretty(&next)?)?;
        self.state = next;

        log::debug!("Committed state serial {}", self.state.serial);
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

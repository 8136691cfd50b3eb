//! Execution engine - applies a plan level by level
//!
//! Actions within one level are independent and run concurrently on a rayon
//! pool; a level finishes completely before the next one starts. Every
//! completed action is committed to recorded state immediately, so a failed or
//! cancelled run leaves exactly the completed subset recorded.

use crate::context::{CancelToken, ConfirmCallback, ProgressCallback};
use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::planner::{Action, Plan, PlannedAction};
use crate::provider::{Provider, ProviderError};
use crate::retry::{LogCallback, RetryCallback, with_retry};
use crate::state::{RecordedState, ResourceRecord, StateLock};
use crate::types::{
    Address, ApplyResult, AttributeMap, ExecuteOptions, ExecuteSummary, ProviderRecord,
    Reference, ResourceStatus,
};
use chrono::Utc;
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};

/// Drives a provider through a [`Plan`]
pub struct Executor<'a> {
    graph: &'a ResourceGraph,
    provider: &'a dyn Provider,
    options: ExecuteOptions,
    cancel: CancelToken,
    retry_callback: &'a dyn RetryCallback,
}

impl<'a> Executor<'a> {
    pub fn new(graph: &'a ResourceGraph, provider: &'a dyn Provider) -> Self {
        Self {
            graph,
            provider,
            options: ExecuteOptions::default(),
            cancel: CancelToken::new(),
            retry_callback: &LogCallback,
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop submitting new actions once `cancel` is triggered
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receive a notification before every readiness poll
    pub fn with_retry_callback(mut self, callback: &'a dyn RetryCallback) -> Self {
        self.retry_callback = callback;
        self
    }

    /// Execute `plan`, committing each completed action through `lock`
    ///
    /// Returns the first failure of the first failing level once that level
    /// has finished; later levels are not started.
    pub fn execute<P, C>(
        &self,
        plan: &Plan,
        lock: &mut StateLock,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ExecuteSummary>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        if plan.is_empty() {
            return Ok(ExecuteSummary::default());
        }

        let prompt = format!("Apply {} change(s)?", plan.len());
        let confirmed = confirm
            .confirm(&prompt)
            .map_err(|e| Error::validation(format!("confirmation failed: {e}")))?;
        if !confirmed {
            return Ok(ExecuteSummary {
                skipped: plan.len(),
                ..Default::default()
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::validation(format!("failed to create thread pool: {e}")))?;

        let lock = Mutex::new(lock);
        let progress = Mutex::new(progress);
        let mut summary = ExecuteSummary::default();
        let mut completed = 0;

        for (level, actions) in plan.levels() {
            if self.cancel.is_cancelled() {
                log::info!("Cancelled before level {level}");
                return Err(Error::Cancelled { completed });
            }

            progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_level_start(level, actions.len());

            let outcomes: Vec<Option<Result<ApplyResult>>> = pool.install(|| {
                actions
                    .par_iter()
                    .map(|planned| {
                        if self.cancel.is_cancelled() {
                            return None;
                        }
                        progress
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .on_action_start(&planned.address, &planned.description());

                        let outcome = self.apply(planned, &lock);

                        let reported = match &outcome {
                            Ok(result) => result.clone(),
                            Err(e) => ApplyResult::Failed {
                                error: e.to_string(),
                            },
                        };
                        progress
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .on_action_complete(&planned.address, &reported);
                        Some(outcome)
                    })
                    .collect()
            });

            progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_level_complete();

            let mut first_error = None;
            let mut interrupted = false;
            for (planned, outcome) in actions.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(result)) => {
                        summary.add_result(&result);
                        completed += 1;
                    }
                    Some(Err(e)) => {
                        log::error!("{} failed: {}", planned.address, e);
                        summary.add_result(&ApplyResult::Failed {
                            error: e.to_string(),
                        });
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    None => interrupted = true,
                }
            }

            if let Some(e) = first_error {
                log::warn!(
                    "Stopping after level {level}: {} action(s) completed, {} failed",
                    completed,
                    summary.failed
                );
                return Err(e);
            }
            if interrupted {
                return Err(Error::Cancelled { completed });
            }
        }

        log::info!(
            "Applied {} action(s): {} created, {} updated, {} replaced, {} destroyed",
            summary.total(),
            summary.created,
            summary.modified,
            summary.replaced,
            summary.removed
        );
        Ok(summary)
    }

    fn apply(&self, planned: &PlannedAction, lock: &Mutex<&mut StateLock>) -> Result<ApplyResult> {
        let address = &planned.address;
        match &planned.action {
            Action::Create => {
                let inputs = self.resolve(address, lock)?;
                self.create(address, inputs, lock)?;
                Ok(ApplyResult::Created)
            }
            Action::Update { .. } => {
                let inputs = self.resolve(address, lock)?;
                let record = self
                    .recorded(address, lock)
                    .ok_or_else(|| Error::provisioning(address, "no recorded state to update"))?;
                if record.inputs == inputs && !record.tainted {
                    return Ok(ApplyResult::Skipped {
                        reason: "already converged".to_string(),
                    });
                }

                log::debug!("Updating {} ({})", address, record.id);
                let updated = self
                    .provider
                    .update(address, &record.id, &inputs)
                    .map_err(|e| provider_error(address, &e))?;
                let ready = self.wait_ready(address, updated)?;
                self.record(address, inputs, ready, lock)?;
                Ok(ApplyResult::Modified)
            }
            Action::Replace { .. } => {
                let inputs = self.resolve(address, lock)?;
                if let Some(record) = self.recorded(address, lock) {
                    self.delete(address, &record.id, lock)?;
                }
                self.create(address, inputs, lock)?;
                Ok(ApplyResult::Replaced)
            }
            Action::Destroy => {
                match self.recorded(address, lock) {
                    Some(record) => self.delete(address, &record.id, lock)?,
                    None => log::debug!("{address} is not recorded, nothing to destroy"),
                }
                Ok(ApplyResult::Removed)
            }
        }
    }

    fn create(
        &self,
        address: &Address,
        inputs: AttributeMap,
        lock: &Mutex<&mut StateLock>,
    ) -> Result<()> {
        log::debug!("Creating {address}");
        let created = self
            .provider
            .create(address, &inputs)
            .map_err(|e| provider_error(address, &e))?;

        if created.status == ResourceStatus::Ready {
            return self.record(address, inputs, created, lock);
        }

        // Track the resource before polling so an abandoned run can clean it up
        self.commit(lock, |state| {
            state.upsert(
                address.clone(),
                ResourceRecord {
                    id: created.id.clone(),
                    inputs: inputs.clone(),
                    outputs: created.attributes.clone(),
                    dependencies: self.graph.dependencies(address),
                    tainted: true,
                    updated_at: Utc::now(),
                },
            );
        })?;

        let ready = self.wait_ready(address, created)?;
        self.record(address, inputs, ready, lock)
    }

    fn delete(&self, address: &Address, id: &str, lock: &Mutex<&mut StateLock>) -> Result<()> {
        log::debug!("Deleting {address} ({id})");
        match self.provider.delete(address, id) {
            Ok(()) => {}
            Err(ProviderError::NotFound(_)) => {
                log::warn!("{address} ({id}) was already gone");
            }
            Err(e) => return Err(provider_error(address, &e)),
        }
        self.commit(lock, |state| {
            state.remove(address);
        })
    }

    /// Poll until the provider reports the resource ready
    fn wait_ready(&self, address: &Address, record: ProviderRecord) -> Result<ProviderRecord> {
        match record.status {
            ResourceStatus::Ready => return Ok(record),
            ResourceStatus::Failed => return Err(failed_status(address, &record)),
            ResourceStatus::Pending => {}
        }

        let id = record.id;
        with_retry(
            &self.options.readiness,
            Some(self.retry_callback),
            |attempt| match self.provider.read(address, &id) {
                Ok(current) => match current.status {
                    ResourceStatus::Ready => Ok(current),
                    ResourceStatus::Failed => Err(failed_status(address, &current)),
                    ResourceStatus::Pending => Err(Error::DependencyNotReady {
                        address: address.clone(),
                        attempts: attempt,
                        message: current
                            .message
                            .unwrap_or_else(|| "still pending".to_string()),
                    }),
                },
                Err(e) if e.is_retryable() => Err(Error::DependencyNotReady {
                    address: address.clone(),
                    attempts: attempt,
                    message: e.to_string(),
                }),
                Err(e) => Err(provider_error(address, &e)),
            },
        )
    }

    fn record(
        &self,
        address: &Address,
        inputs: AttributeMap,
        ready: ProviderRecord,
        lock: &Mutex<&mut StateLock>,
    ) -> Result<()> {
        let record = ResourceRecord {
            id: ready.id,
            inputs,
            outputs: ready.attributes,
            dependencies: self.graph.dependencies(address),
            tainted: false,
            updated_at: Utc::now(),
        };
        self.commit(lock, move |state| state.upsert(address.clone(), record))
    }

    /// Resolve a declared resource's attributes against committed outputs
    fn resolve(&self, address: &Address, lock: &Mutex<&mut StateLock>) -> Result<AttributeMap> {
        let spec = self
            .graph
            .get(address)
            .ok_or_else(|| Error::provisioning(address, "not declared in the resource graph"))?;

        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state: &RecordedState = guard.state();
        let lookup = |r: &Reference| state.output(&r.address, &r.attribute).cloned();

        let mut resolved = AttributeMap::new();
        for (key, value) in &spec.attributes {
            let value = value.resolve(&lookup).ok_or_else(|| {
                let mut refs = Vec::new();
                value.references(&mut refs);
                let missing = refs
                    .into_iter()
                    .find(|r| lookup(*r).is_none())
                    .map_or_else(|| key.clone(), ToString::to_string);
                Error::provisioning(address, format!("unresolved reference {missing}"))
            })?;
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }

    fn recorded(&self, address: &Address, lock: &Mutex<&mut StateLock>) -> Option<ResourceRecord> {
        lock.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
            .get(address)
            .cloned()
    }

    fn commit<F>(&self, lock: &Mutex<&mut StateLock>, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut RecordedState),
    {
        lock.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commit(mutate)
    }
}

fn provider_error(address: &Address, error: &ProviderError) -> Error {
    Error::provisioning(address, error.to_string())
}

fn failed_status(address: &Address, record: &ProviderRecord) -> Error {
    Error::provisioning(
        address,
        record
            .message
            .clone()
            .unwrap_or_else(|| "provider reported failure".to_string()),
    )
}

//! Callbacks and run control
//!
//! These traits keep the engine free of any particular terminal UI.

use crate::types::{Address, ApplyResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for execution operations
pub trait ProgressCallback: Send {
    /// Called before a dependency level starts
    fn on_level_start(&mut self, level: usize, count: usize);

    /// Called when an action is about to be submitted
    fn on_action_start(&mut self, address: &Address, description: &str);

    /// Called when an action completes
    fn on_action_complete(&mut self, address: &Address, result: &ApplyResult);

    /// Called when a level completes
    fn on_level_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    fn confirm(&mut self, prompt: &str) -> anyhow::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_level_start(&mut self, _level: usize, _count: usize) {}
    fn on_action_start(&mut self, _address: &Address, _description: &str) {}
    fn on_action_complete(&mut self, _address: &Address, _result: &ApplyResult) {}
    fn on_level_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Cooperative cancellation flag shared between the caller and the executor
///
/// The executor checks it before submitting each action; an action already
/// submitted runs to completion and is recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_confirm_callbacks() {
        assert!(AutoConfirm.confirm("Apply?").unwrap());
        assert!(!AutoDecline.confirm("Apply?").unwrap());
    }
}

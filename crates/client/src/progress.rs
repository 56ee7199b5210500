//! Lockable progress shared between a session and a polling thread.
//!
//! The driving code and the poller take the same mutex for every read or
//! write. The lock is short-lived and never held across a network call.
//! Raising the cancel flag through any guard wakes tasks waiting in
//! [`Progress::cancelled`].

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Progress values visible to the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressState {
    current_value: u64,
    total_value: u64,
    message: String,
    indeterminate: bool,
    should_cancel: bool,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            current_value: 0,
            total_value: 0,
            message: String::new(),
            indeterminate: true,
            should_cancel: false,
        }
    }
}

impl ProgressState {
    pub fn current_value(&self) -> u64 {
        self.current_value
    }

    pub fn total_value(&self) -> u64 {
        self.total_value
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_indeterminate(&self) -> bool {
        self.indeterminate
    }

    pub fn should_cancel(&self) -> bool {
        self.should_cancel
    }

    /// Completed fraction in `0.0..=1.0`, or `None` while indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        if self.indeterminate || self.total_value == 0 {
            return None;
        }
        Some((self.current_value as f64 / self.total_value as f64).min(1.0))
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Moves `current_value` forward to `value`. Never moves it back.
    pub fn advance_to(&mut self, value: u64) {
        self.current_value = self.current_value.max(value);
    }

    pub fn increment(&mut self, by: u64) {
        self.current_value = self.current_value.saturating_add(by);
    }

    /// Sets the expected total and leaves indeterminate mode.
    pub fn set_total(&mut self, total: u64) {
        self.total_value = total;
        self.indeterminate = false;
    }

    pub fn set_indeterminate(&mut self, indeterminate: bool) {
        self.indeterminate = indeterminate;
    }

    /// Raises the cancel flag. It stays up until cleared or reset.
    pub fn request_cancel(&mut self) {
        self.should_cancel = true;
    }

    pub fn clear_cancel(&mut self) {
        self.should_cancel = false;
    }

    /// Returns to the initial state, including the cancel flag.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ProgressState>,
    /// Mirrors `should_cancel` for async waiters.
    cancel_tx: watch::Sender<bool>,
}

impl Default for Shared {
    fn default() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(ProgressState::default()),
            cancel_tx,
        }
    }
}

/// Shared handle to a [`ProgressState`]. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<Shared>);

/// Exclusive access to the progress values until dropped.
pub struct ProgressGuard<'a> {
    state: MutexGuard<'a, ProgressState>,
    cancel_tx: &'a watch::Sender<bool>,
    was_cancelled: bool,
}

impl Deref for ProgressGuard<'_> {
    type Target = ProgressState;

    fn deref(&self) -> &ProgressState {
        &self.state
    }
}

impl DerefMut for ProgressGuard<'_> {
    fn deref_mut(&mut self) -> &mut ProgressState {
        &mut self.state
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        // Published before the mutex is released.
        if self.state.should_cancel != self.was_cancelled {
            self.cancel_tx.send_replace(self.state.should_cancel);
        }
    }
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the progress state. A poisoned lock is recovered.
    pub fn lock(&self) -> ProgressGuard<'_> {
        let state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        let was_cancelled = state.should_cancel;
        ProgressGuard {
            state,
            cancel_tx: &self.0.cancel_tx,
            was_cancelled,
        }
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }

    /// Raises the cancel flag without waiting for acknowledgment.
    pub fn request_cancel(&self) {
        self.lock().request_cancel();
    }

    pub fn should_cancel(&self) -> bool {
        self.lock().should_cancel()
    }

    /// Resolves once the cancel flag is raised.
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.0.cancel_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once raised.
        let _ = cancel_rx.wait_for(|cancel| *cancel).await;
    }
}

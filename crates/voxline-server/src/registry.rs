//! Live-call registry.
//!
//! One entry per running pipeline, used for duplicate-Identify rejection,
//! the active-call gauge, and cancelling stragglers when the drain window
//! runs out.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use voxline_core::CallId;

/// Registry of calls currently owned by this process.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: Mutex<HashMap<CallId, CancellationToken>>,
}

impl CallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a call id. `false` means a pipeline already owns it and the
    /// new connection must be rejected.
    #[must_use]
    pub fn register(&self, call_id: CallId, cancel: CancellationToken) -> bool {
        let mut calls = self.lock();
        if calls.contains_key(&call_id) {
            return false;
        }
        calls.insert(call_id, cancel);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("voxline_active_calls").set(calls.len() as f64);
        true
    }

    /// Release a call id when its pipeline returns.
    pub fn remove(&self, call_id: CallId) {
        let mut calls = self.lock();
        calls.remove(&call_id);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("voxline_active_calls").set(calls.len() as f64);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Force-cancel every remaining call (drain deadline expired).
    pub fn cancel_all(&self) {
        for (call_id, cancel) in self.lock().iter() {
            tracing::warn!(call_id = %call_id, "Force-cancelling call past the drain deadline");
            cancel.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CallId, CancellationToken>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

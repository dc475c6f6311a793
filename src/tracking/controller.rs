use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use tokio_util::sync::CancellationToken;

/// Registry of open tracking streams. Every stream runs under a child of the
/// root token, so `shutdown` cancels all of them at once.
#[derive(Clone)]
pub struct TrackingController {
    root: CancellationToken,
    active: Arc<Mutex<HashMap<String, usize>>>,
}

/// Held by a running stream; deregisters it on drop.
pub struct StreamGuard {
    session_id: String,
    token: CancellationToken,
    active: Arc<Mutex<HashMap<String, usize>>>,
}

impl TrackingController {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(&self, session_id: &str) -> StreamGuard {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active.entry(session_id.to_string()).or_insert(0) += 1;

        StreamGuard {
            session_id: session_id.to_string(),
            token: self.root.child_token(),
            active: Arc::clone(&self.active),
        }
    }

    pub fn active_streams(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.values().sum()
    }

    pub fn streams_for(&self, session_id: &str) -> usize {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.get(session_id).copied().unwrap_or(0)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn shutdown(&self) {
        info!("Cancelling {} tracking stream(s)", self.active_streams());
        self.root.cancel();
    }
}

impl Default for TrackingController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = active.get_mut(&self.session_id) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.session_id);
            }
        }
    }
}

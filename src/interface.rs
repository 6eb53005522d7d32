//! Threaded interface for submitting and controlling long-running operations.
//!
//! Scans over many tables can take a while. This module runs them on a
//! background thread, one thread per operation, and lets callers cancel them
//! by id. Cancellation is cooperative through an `Arc<AtomicBool>`: it is
//! observed between units of work, never in the middle of a statement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::discovery::{Discovery, ScanOutcome, ScanRequest};
use crate::error::{DiscoverxError, Result};

/// Cancellation token shared with the worker.
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
        self.0.load(Ordering::Relaxed)
    }
}

/// Opaque operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OperationId(u64);

/// Handle to a running or completed operation.
pub struct OperationHandle<T> {
    pub id: OperationId,
    cancel: CancelToken,
    started: Instant,
    join: Option<JoinHandle<Result<T>>>,
}
impl<T> OperationHandle<T> {
    /// Request cancellation. The worker stops at the next unit boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    /// Wait for the operation to finish.
    pub fn join(mut self) -> Result<T> {
        match self.join.take() {
            Some(join) => join
                .join()
                .unwrap_or_else(|_| Err(DiscoverxError::Invariant("operation thread panicked".into()))),
            None => Err(DiscoverxError::Invariant("operation already joined".into())),
        }
    }
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Registry managing operation lifecycles.
pub struct OperationInterface {
    discovery: Arc<Discovery>,
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<OperationId, CancelToken>>>,
}

impl OperationInterface {
    pub fn new(discovery: Arc<Discovery>) -> Self {
        Self {
            discovery,
            next_id: AtomicU64::new(0),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allocate_id(&self) -> OperationId {
        OperationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn spawn<T, F>(&self, work: F) -> Result<OperationHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Discovery, &CancelToken) -> Result<T> + Send + 'static,
    {
        let id = self.allocate_id();
        let cancel = CancelToken::new();
        self.active.lock()?.insert(id, cancel.clone());

        let discovery = Arc::clone(&self.discovery);
        let active = Arc::clone(&self.active);
        let token = cancel.clone();
        let join = std::thread::spawn(move || {
            let outcome = work(&discovery, &token);
            if let Err(e) = &outcome {
                warn!(operation = id.0, error = %e, "operation failed");
            }
            if let Ok(mut active) = active.lock() {
                active.remove(&id);
            }
            outcome
        });
        info!(operation = id.0, "operation started");
        Ok(OperationHandle { id, cancel, started: Instant::now(), join: Some(join) })
    }

    /// Start a scan on a background thread.
    pub fn start_scan(&self, request: ScanRequest) -> Result<OperationHandle<ScanOutcome>> {
        self.spawn(move |discovery, cancel| discovery.scan_with(&request, cancel))
    }

    /// Operations started and not yet finished.
    pub fn running(&self) -> Result<Vec<OperationId>> {
        Ok(self.active.lock()?.keys().copied().collect())
    }

    /// Cancel an operation by id. Returns false when it is unknown or finished.
    pub fn cancel(&self, id: OperationId) -> bool {
        match self.active.lock() {
            Ok(active) => match active.get(&id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

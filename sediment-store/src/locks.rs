//! Concurrency primitives for the repository.
//!
//! No global lock: versioned writes serialize per identity, reverse-map
//! appends per key, and the operation gate lets `close` drain in-flight
//! work before the backend is released.

use std::collections::HashMap;
use std::hash::Hash as StdHash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};

use crate::error::{Result, StoreError};

/// A map of named async mutexes, created on first use.
///
/// Entries are never removed; the population is bounded by the number of
/// distinct identities (or reverse-map keys) touched by this process.
#[derive(Debug, Default)]
pub(crate) struct LockMap<K> {
    inner: Mutex<HashMap<K, std::sync::Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + StdHash + Clone> LockMap<K> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the mutex for `key`, creating it if needed.
    pub(crate) async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .entry(key.clone())
                .or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

/// Tracks in-flight operations and refuses new ones after close.
#[derive(Debug, Default)]
pub(crate) struct OpGate {
    closed: AtomicBool,
    active: AtomicUsize,
    drained: Notify,
}

impl OpGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an operation. Fails with `StorageClosed` once closed.
    pub(crate) fn begin(&self) -> Result<OpGuard<'_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::StorageClosed);
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        // Re-check: close() may have flipped the flag between the load and
        // the increment.
        if self.closed.load(Ordering::SeqCst) {
            self.finish_one();
            return Err(StoreError::StorageClosed);
        }
        Ok(OpGuard { gate: self })
    }

    /// Stop accepting operations and wait for in-flight ones to finish.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let drained = self.drained.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn finish_one(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// RAII registration of one in-flight operation.
#[derive(Debug)]
pub(crate) struct OpGuard<'a> {
    gate: &'a OpGate,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.gate.finish_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn gate_rejects_after_close() {
        let gate = OpGate::new();
        {
            let _guard = gate.begin().expect("open");
        }
        gate.close().await;
        assert!(gate.is_closed());
        let err = gate.begin().expect_err("closed");
        assert_eq!(err.code(), "StorageClosed");
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_work() {
        let gate = Arc::new(OpGate::new());
        let worker_gate = gate.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let worker = tokio::spawn(async move {
            let _guard = worker_gate.begin().expect("open");
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        started_rx.await.expect("worker started");
        gate.close().await;
        // close() returning means the worker's guard was dropped.
        worker.await.expect("worker finished");
    }

    #[tokio::test]
    async fn lock_map_serializes_per_key() {
        let locks: Arc<LockMap<String>> = Arc::new(LockMap::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let key = "same".to_string();
                let _guard = locks.lock(&key).await;
                let seen = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(seen + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
        // Without per-key mutual exclusion the read/yield/write pattern
        // would lose updates.
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}

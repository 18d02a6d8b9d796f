//! Buffered audit emitter.
//!
//! Entries are redacted, traced, and buffered in memory; a periodic task (or
//! a full buffer, or a critical action) flushes the buffer to the durable
//! store as one batch. A failed flush re-queues the batch at the front of the
//! buffer in order, so delivery to the store is at-least-once and ordered.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use consentry_core::{AuditAction, AuditEntry, AuditSink, AuditStore, EngineError, EngineResult};

use crate::redaction::RedactionPolicy;

const DEFAULT_BUFFER_CAPACITY: usize = 64;

fn lock_poisoned<T>(e: std::sync::PoisonError<T>) -> EngineError {
    EngineError::Storage(format!("lock poisoned: {}", e))
}

/// Actions flushed to the store immediately rather than on the next tick.
fn is_critical(action: AuditAction) -> bool {
    matches!(
        action,
        AuditAction::AccessDenied | AuditAction::RequestDenied | AuditAction::GrantRevoked
    )
}

pub struct AuditEmitter {
    store: Arc<dyn AuditStore>,
    policy: RedactionPolicy,
    buffer: Mutex<VecDeque<AuditEntry>>,
    buffer_capacity: usize,
}

impl AuditEmitter {
    pub fn new(store: Arc<dyn AuditStore>, policy: RedactionPolicy) -> Self {
        Self::with_capacity(store, policy, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(
        store: Arc<dyn AuditStore>,
        policy: RedactionPolicy,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            store,
            policy,
            buffer: Mutex::new(VecDeque::new()),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Flush every buffered entry to the store as one batch. On store failure
    /// the batch is put back at the front, in order, and the error returned.
    pub fn flush(&self) -> EngineResult<usize> {
        let batch: Vec<AuditEntry> = {
            let mut buffer = self.buffer.lock().map_err(lock_poisoned)?;
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        if let Err(e) = self.store.append_batch(&batch) {
            let mut buffer = self.buffer.lock().map_err(lock_poisoned)?;
            for entry in batch.into_iter().rev() {
                buffer.push_front(entry);
            }
            return Err(e);
        }
        tracing::debug!(count, "flushed audit batch");
        Ok(count)
    }

    pub fn pending(&self) -> EngineResult<usize> {
        Ok(self.buffer.lock().map_err(lock_poisoned)?.len())
    }

    /// Spawn the periodic flush task. The task flushes on every tick and once
    /// more when the shutdown signal fires, then exits.
    pub fn spawn_flush_task(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let emitter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = emitter.flush() {
                            tracing::warn!(error = %e, "audit flush failed, batch re-queued");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            if let Err(e) = emitter.flush() {
                                tracing::error!(error = %e, "final audit flush failed");
                            }
                            return;
                        }
                    }
                }
            }
        })
    }
}

impl AuditSink for AuditEmitter {
    fn record(&self, mut entry: AuditEntry) -> EngineResult<()> {
        self.policy.redact(&mut entry.metadata);

        tracing::info!(
            action = %entry.action,
            student_id = entry.student_id.as_str(),
            service_id = entry.service_id.as_ref().map(|s| s.as_str()),
            "audit"
        );

        let should_flush = {
            let mut buffer = self.buffer.lock().map_err(lock_poisoned)?;
            let critical = is_critical(entry.action);
            buffer.push_back(entry);
            critical || buffer.len() >= self.buffer_capacity
        };

        if should_flush {
            // The flush here is opportunistic: on failure the batch is back
            // in the buffer for the periodic task, so recording succeeded.
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "immediate audit flush failed, batch re-queued");
            }
        }
        Ok(())
    }
}

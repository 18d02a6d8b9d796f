//! Queue of risk events for the external risk-scoring collaborator.

use std::collections::VecDeque;
use std::sync::Mutex;

use consentry_core::{EngineError, EngineResult, RiskEvent};

/// FIFO queue of consent decisions awaiting pickup.
///
/// Delivery is at-least-once: `drain` pops everything under one lock, so a
/// caller that crashes after draining must not re-request already-drained
/// events; from drain onward, delivery is the caller's responsibility.
#[derive(Default)]
pub struct RiskEventQueue {
    events: Mutex<VecDeque<RiskEvent>>,
}

impl RiskEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: RiskEvent) -> EngineResult<()> {
        self.events
            .lock()
            .map_err(|e| EngineError::Internal(format!("risk event lock poisoned: {}", e)))?
            .push_back(event);
        Ok(())
    }

    /// Pop and return every queued event, oldest first.
    pub fn drain(&self) -> EngineResult<Vec<RiskEvent>> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| EngineError::Internal(format!("risk event lock poisoned: {}", e)))?;
        Ok(events.drain(..).collect())
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

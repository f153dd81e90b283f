//! Table-driven reconnect scheduling.
//!
//! Delays come from a fixed table indexed by attempt number and clamp to the
//! last entry. At most one retry is pending at any time; scheduling a new
//! retry replaces the old one.

use std::time::Duration;
use tracing::{debug, trace};

use crate::config::BackoffSettings;
use crate::event::{ChannelEvent, EventSender};
use crate::timer::TimerHandle;

/// Delay for `attempt` (0-based) from `table`, clamped to the last entry.
///
/// An empty table yields a zero delay; configuration validation rejects it.
pub fn delay_for(table: &[Duration], attempt: u32) -> Duration {
    let index = (attempt as usize).min(table.len().saturating_sub(1));
    table.get(index).copied().unwrap_or(Duration::ZERO)
}

/// Owns the single pending retry timer.
pub(crate) struct BackoffScheduler {
    delays: Vec<Duration>,
    pending: Option<TimerHandle>,
    next_generation: u64,
    events: EventSender,
}

impl BackoffScheduler {
    pub(crate) fn new(settings: &BackoffSettings, events: EventSender) -> Self {
        BackoffScheduler {
            delays: settings
                .delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            pending: None,
            next_generation: 0,
            events,
        }
    }

    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        delay_for(&self.delays, attempt)
    }

    /// Arms the retry timer for `attempt`, replacing any pending one.
    /// Returns the chosen delay.
    pub(crate) fn schedule_retry(&mut self, attempt: u32) -> Duration {
        self.cancel();

        let delay = self.delay_for(attempt);
        self.next_generation += 1;
        let generation = self.next_generation;

        debug!(attempt, delay_ms = delay.as_millis() as u64, generation, "Retry armed");
        self.pending = Some(TimerHandle::once(
            generation,
            delay,
            self.events.clone(),
            ChannelEvent::RetryDue { generation },
        ));
        delay
    }

    /// Cancels the pending retry. Returns true if one was pending.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(timer) => {
                trace!(generation = timer.generation(), "Retry cancelled");
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Consumes a fired retry. Returns false for a stale generation.
    pub(crate) fn take_fired(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some(timer) if timer.generation() == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

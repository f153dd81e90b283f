//! Liveness tracking for an open channel.
//!
//! The monitor only exists in a meaningful sense while the channel is Open:
//! `start` creates the liveness record and arms a periodic check, `stop`
//! tears both down. A check that finds the channel stale reports it exactly
//! once and stops the monitor.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::HeartbeatSettings;
use crate::event::{ChannelEvent, EventSender};
use crate::timer::TimerHandle;

/// Result of one periodic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatCheck {
    /// Tick from a stopped or replaced monitor.
    Ignored,
    Fresh,
    /// Nothing received for longer than the staleness window.
    Stale { silent_for: Duration },
}

pub(crate) struct HeartbeatMonitor {
    stale_after: Duration,
    check_interval: Duration,
    last_seen_at: Option<Instant>,
    ticker: Option<TimerHandle>,
    next_generation: u64,
    events: EventSender,
}

impl HeartbeatMonitor {
    pub(crate) fn new(settings: &HeartbeatSettings, events: EventSender) -> Self {
        HeartbeatMonitor {
            stale_after: settings.stale_after(),
            check_interval: settings.check_interval(),
            last_seen_at: None,
            ticker: None,
            next_generation: 0,
            events,
        }
    }

    /// Creates a fresh liveness record and arms the periodic check.
    pub(crate) fn start(&mut self) {
        self.last_seen_at = Some(Instant::now());

        self.next_generation += 1;
        let generation = self.next_generation;
        self.ticker = Some(TimerHandle::every(
            generation,
            self.check_interval,
            self.events.clone(),
            move || ChannelEvent::HeartbeatCheck { generation },
        ));
        debug!(
            stale_after_secs = self.stale_after.as_secs(),
            check_every_secs = self.check_interval.as_secs(),
            "Heartbeat monitor started"
        );
    }

    /// Marks the channel alive now.
    pub(crate) fn record_heartbeat(&mut self) {
        if self.last_seen_at.is_some() {
            self.last_seen_at = Some(Instant::now());
        }
    }

    pub(crate) fn stop(&mut self) {
        self.ticker = None;
        self.last_seen_at = None;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub(crate) fn last_seen_at(&self) -> Option<Instant> {
        self.last_seen_at
    }

    /// Time since the channel last showed signs of life.
    pub(crate) fn age(&self) -> Option<Duration> {
        self.last_seen_at.map(|seen| seen.elapsed())
    }

    /// Handles one periodic tick.
    pub(crate) fn check(&mut self, generation: u64) -> HeartbeatCheck {
        let current = self.ticker.as_ref().map(TimerHandle::generation);
        if current != Some(generation) {
            return HeartbeatCheck::Ignored;
        }

        let silent_for = self.age().unwrap_or_default();
        if silent_for > self.stale_after {
            warn!(silent_secs = silent_for.as_secs(), "Heartbeat stale");
            self.stop();
            return HeartbeatCheck::Stale { silent_for };
        }
        HeartbeatCheck::Fresh
    }
}

//! # Circuit Breaker
//!
//! Suspends connection attempts after too many consecutive failures.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────────┐  failures == threshold   ┌──────────┐                   │
//! │   │  CLOSED  │ ───────────────────────► │   OPEN   │                   │
//! │   │          │                          │          │                   │
//! │   │ attempts │ ◄─────────────────────── │ connect  │                   │
//! │   │ allowed  │   cooldown elapsed       │ refused  │                   │
//! │   └──────────┘   (tally reset)          └──────────┘                   │
//! │        ▲                                                               │
//! │        └── record_success() resets the tally                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no half-open trial state: when the cooldown elapses the breaker
//! closes outright and the supervisor decides whether to reconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitSettings;
use crate::event::{ChannelEvent, EventSender};
use crate::timer::TimerHandle;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
        }
    }
}

/// Consecutive-failure tally with a self-expiring open period.
pub(crate) struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: u32,
    state: CircuitBreakerState,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    cooldown_timer: Option<TimerHandle>,
    next_generation: u64,
    events: EventSender,
}

impl CircuitBreaker {
    pub(crate) fn new(settings: &CircuitSettings, events: EventSender) -> Self {
        CircuitBreaker {
            threshold: settings.failure_threshold,
            cooldown: settings.cooldown(),
            failures: 0,
            state: CircuitBreakerState::Closed,
            opened_at: None,
            opened_at_utc: None,
            cooldown_timer: None,
            next_generation: 0,
            events,
        }
    }

    pub(crate) fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == CircuitBreakerState::Open
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at_utc
    }

    /// Time left until the cooldown elapses; zero when closed.
    pub(crate) fn retry_after(&self) -> Duration {
        match self.opened_at {
            Some(opened) => self.cooldown.saturating_sub(opened.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Counts one failure. Returns true if this failure opened the breaker.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);

        if self.is_open() || self.failures < self.threshold {
            return false;
        }

        self.state = CircuitBreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.opened_at_utc = Some(Utc::now());

        self.next_generation += 1;
        let generation = self.next_generation;
        self.cooldown_timer = Some(TimerHandle::once(
            generation,
            self.cooldown,
            self.events.clone(),
            ChannelEvent::CooldownElapsed { generation },
        ));

        warn!(
            failures = self.failures,
            cooldown_secs = self.cooldown.as_secs(),
            "Circuit breaker opened"
        );
        true
    }

    /// Clears the tally after a successful open.
    pub(crate) fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Consumes a fired cooldown and closes the breaker. Returns false for a
    /// stale generation.
    pub(crate) fn take_cooldown(&mut self, generation: u64) -> bool {
        match &self.cooldown_timer {
            Some(timer) if timer.generation() == generation => {}
            _ => return false,
        }

        self.cooldown_timer = None;
        self.failures = 0;
        self.state = CircuitBreakerState::Closed;
        self.opened_at = None;
        self.opened_at_utc = None;

        info!("Circuit breaker cooldown elapsed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::settle;
    use tokio::sync::mpsc;

    fn breaker(threshold: u32, cooldown_ms: u64) -> (CircuitBreaker, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = CircuitSettings {
            failure_threshold: threshold,
            cooldown_ms,
        };
        (CircuitBreaker::new(&settings, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let (mut breaker, _rx) = breaker(3, 1_000);

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
        assert!(breaker.opened_at().is_some());

        // Further failures while open do not re-open.
        assert!(!breaker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_tally() {
        let (mut breaker, _rx) = breaker(3, 1_000);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_closes_breaker() {
        let (mut breaker, mut rx) = breaker(1, 300_000);

        assert!(breaker.record_failure());
        assert_eq!(breaker.retry_after(), Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(breaker.retry_after(), Duration::from_secs(180));

        tokio::time::advance(Duration::from_secs(180)).await;
        settle().await;

        let generation = match rx.try_recv() {
            Ok(ChannelEvent::CooldownElapsed { generation }) => generation,
            other => panic!("expected CooldownElapsed, got {:?}", other),
        };
        assert!(breaker.take_cooldown(generation));
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failures(), 0);
        assert_eq!(breaker.retry_after(), Duration::ZERO);

        // Consumed once.
        assert!(!breaker.take_cooldown(generation));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitBreakerState::Open.to_string(), "open");
        assert_eq!(
            serde_json::to_string(&CircuitBreakerState::Closed).unwrap(),
            "\"closed\""
        );
    }
}

//! # Cancellable Timers
//!
//! Single-owner timer handles backing the retry, heartbeat and cooldown
//! timers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  owner component          TimerHandle            channel actor         │
//! │  ───────────────          ───────────            ─────────────         │
//! │  arm(generation = 7) ───► spawned task ──sleep──► ChannelEvent{gen: 7} │
//! │                                                        │               │
//! │  cancel() / drop ───────► task.abort()                 ▼               │
//! │                                                  owner.take_fired(7)   │
//! │                                                  → false if re-armed   │
//! │                                                    or cancelled        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Aborting is best effort: a task may already have queued its event. The
//! generation check on the receiving side turns such an event into a no-op.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

/// Owned handle to a spawned timer task. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Posts `event` once after `delay`.
    pub(crate) fn once<E>(
        generation: u64,
        delay: Duration,
        tx: mpsc::UnboundedSender<E>,
        event: E,
    ) -> Self
    where
        E: Send + 'static,
    {
        // Deadline is fixed now, not when the task is first polled.
        let deadline = Instant::now() + delay;
        let task = tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = tx.send(event);
        });
        TimerHandle { generation, task }
    }

    /// Posts `make()` every `period`, first after one full period.
    pub(crate) fn every<E, F>(
        generation: u64,
        period: Duration,
        tx: mpsc::UnboundedSender<E>,
        make: F,
    ) -> Self
    where
        E: Send + 'static,
        F: Fn() -> E + Send + 'static,
    {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let task = tokio::spawn(async move {
            loop {
                ticks.tick().await;
                if tx.send(make()).is_err() {
                    break;
                }
            }
        });
        TimerHandle { generation, task }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

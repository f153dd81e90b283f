//! Events delivered to the channel actor.
//!
//! Transport tasks and timers never touch channel state directly; they post
//! one of these into the actor's queue and the supervisor handles it in order.

use tokio::sync::mpsc;

use crate::transport::{ConnectionId, TransportEvent};

/// Sender half of the channel event queue.
pub(crate) type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Receiver half of the channel event queue.
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Something happened that the supervisor must react to.
///
/// Timer events carry the generation of the timer that produced them so that
/// a timer which fired just before being cancelled is recognised as stale.
#[derive(Debug)]
pub(crate) enum ChannelEvent {
    /// Hook invocation from a transport instance.
    Transport {
        connection: ConnectionId,
        event: TransportEvent,
    },

    /// Backoff delay elapsed.
    RetryDue { generation: u64 },

    /// Periodic staleness check.
    HeartbeatCheck { generation: u64 },

    /// Circuit breaker cooldown elapsed.
    CooldownElapsed { generation: u64 },
}

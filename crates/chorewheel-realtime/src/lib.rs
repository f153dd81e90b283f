//! # chorewheel-realtime: Resilient Realtime Channel
//!
//! Keeps a long-lived server-push connection open and turns server events
//! into cache invalidations.
//!
//! ## Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Realtime Channel                               │
//! │                                                                         │
//! │  environment signals                                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌─────────────────────┐   commands   ┌────────────────────────────┐   │
//! │  │ LifecycleController │ ───────────► │ channel actor              │   │
//! │  │  connect/disconnect │              │  ConnectionSupervisor      │   │
//! │  │  toggle_enabled     │ ◄─────────── │   ├─ BackoffScheduler      │   │
//! │  │  status/diagnostics │    watch     │   ├─ CircuitBreaker        │   │
//! │  └─────────────────────┘              │   ├─ HeartbeatMonitor      │   │
//! │                                       │   └─ EventDispatcher       │   │
//! │                                       └──────┬──────────────▲──────┘   │
//! │                                   open/close │              │ events   │
//! │                                       ┌──────▼──────────────┴──────┐   │
//! │                                       │ TransportAdapter           │   │
//! │                                       │  push stream | duplex      │   │
//! │                                       └────────────────────────────┘   │
//! │                                                                         │
//! │  cache invalidator ◄── CacheKey per affected collection/item/detail     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Policy
//!
//! | Failure                    | Effect                                      |
//! |----------------------------|---------------------------------------------|
//! | malformed message          | counted in diagnostics, channel stays open  |
//! | transient close / error    | retry after 1s, 2s, 5s, 10s, 30s, 30s, ...  |
//! | no liveness for 90s        | one forced reconnect (transient path)       |
//! | 10 consecutive failures    | breaker opens for 5 minutes                 |
//! | duplex close 4001 / 4003   | surfaced as permanent, never retried        |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chorewheel_realtime::{
//!     transport_for, LifecycleController, LoggingInvalidator, ManualSignals, RealtimeConfig,
//!     StaticCredentials,
//! };
//!
//! # async fn run() -> chorewheel_realtime::RealtimeResult<()> {
//! let config = RealtimeConfig::load_or_default(None);
//! let controller = LifecycleController::mount(
//!     config.clone(),
//!     transport_for(&config)?,
//!     Arc::new(StaticCredentials::from_env()?),
//!     Arc::new(LoggingInvalidator),
//!     Arc::new(ManualSignals::default()),
//! )
//! .await;
//!
//! println!("{:?}", controller.status().state);
//! controller.unmount().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod circuit;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod status;
pub mod supervisor;
pub mod transport;

mod channel;
mod event;
mod heartbeat;
mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::delay_for;
pub use circuit::CircuitBreakerState;
pub use collaborators::{
    CacheInvalidator, CredentialProvider, EnvironmentSignals, LoggingInvalidator, ManualSignals,
    RecordingInvalidator, StaticCredentials, Visibility,
};
pub use config::{RealtimeConfig, TransportKind};
pub use controller::LifecycleController;
pub use error::{RealtimeError, RealtimeResult};
pub use status::{ChannelStatus, ConnectionState, Diagnostics, LastEvent, StatusError};
pub use supervisor::ConnectOutcome;
pub use transport::{
    transport_for, CloseDisposition, CloseInfo, ConnectionId, DuplexSocketTransport, OpenTarget,
    PushStreamTransport, TransportAdapter, TransportConnection, TransportEvent, TransportEvents,
};

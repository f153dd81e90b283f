//! # chorewheel-core: Pure Event Logic for Chorewheel
//!
//! Interprets what the server pushes over the realtime channel. Nothing in
//! this crate opens a socket, sleeps, or reads a clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Chorewheel Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              chorewheel-realtime (channel engine)               │   │
//! │  │     transports ──► supervisor ──► cache invalidator             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ raw text                              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ chorewheel-core (THIS CRATE) ★                  │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐   ┌──────────────┐   ┌──────────────────┐     │   │
//! │  │   │  envelope  │──►│   dispatch   │──►│  invalidation    │     │   │
//! │  │   │  parse     │   │   table      │   │  CacheKey set    │     │   │
//! │  │   └────────────┘   └──────────────┘   └──────────────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • PURE FUNCTIONS                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`envelope`] - Wire envelope and event type classification
//! - [`invalidation`] - Cache keys and invalidation sets
//! - [`dispatch`] - Envelope → invalidation/diagnostic table
//! - [`error`] - Parse errors
//!
//! ## Example Usage
//!
//! ```rust
//! use chorewheel_core::{CacheKey, EventDispatcher, EventEnvelope};
//!
//! let envelope = EventEnvelope::parse(r#"{"type":"chore.completed","data":{"chore":{"id":7}}}"#)
//!     .unwrap();
//! let dispatch = EventDispatcher::default().dispatch(&envelope);
//!
//! assert!(dispatch.invalidations.contains(&CacheKey::Item("chore:7".into())));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod invalidation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use dispatch::{DiagnosticUpdate, Dispatch, EventDispatcher, ResourceSpec, SubResourceSpec};
pub use envelope::{EventEnvelope, EventKind, MutationAction};
pub use error::{CoreError, CoreResult};
pub use invalidation::{CacheKey, InvalidationSet};

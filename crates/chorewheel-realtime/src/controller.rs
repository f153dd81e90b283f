//! # Lifecycle Controller
//!
//! The surface the rest of the app talks to.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   mount() ───────────► enabled && credentials valid → connect()         │
//! │   foreground signal ─► !Open && enabled && credentials valid → connect()│
//! │   toggle_enabled(false) / unmount() ─► disconnect(), unconditionally    │
//! │                                                                         │
//! │   ┌──────────────────────┐  commands   ┌─────────────────────────────┐  │
//! │   │ LifecycleController  │ ──────────► │ channel actor (lazy spawn)  │  │
//! │   │  (Clone, Arc inner)  │ ◄────────── │   ConnectionSupervisor      │  │
//! │   └──────────────────────┘ watch: status, diagnostics                │  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chorewheel_core::EventDispatcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::ChannelHandle;
use crate::collaborators::{
    CacheInvalidator, CredentialProvider, EnvironmentSignals, Visibility,
};
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::status::{ChannelStatus, ConnectionState, Diagnostics};
use crate::supervisor::{Collaborators, ConnectOutcome, ConnectionSupervisor, Publishers};
use crate::transport::TransportAdapter;

struct Inner {
    config: RealtimeConfig,
    collaborators: Collaborators,
    signals: Arc<dyn EnvironmentSignals>,
    dispatcher: EventDispatcher,
    enabled: AtomicBool,
    channel: Mutex<Option<ChannelHandle>>,
    publishers: Publishers,
    visibility_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Consumer-facing handle to the realtime channel. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    /// Builds a controller without connecting or watching signals.
    pub fn new(
        config: RealtimeConfig,
        adapter: Arc<dyn TransportAdapter>,
        credentials: Arc<dyn CredentialProvider>,
        invalidator: Arc<dyn CacheInvalidator>,
        signals: Arc<dyn EnvironmentSignals>,
    ) -> Self {
        Self::with_dispatcher(
            config,
            adapter,
            credentials,
            invalidator,
            signals,
            EventDispatcher::default(),
        )
    }

    /// Like [`new`](Self::new) with a custom dispatch table.
    pub fn with_dispatcher(
        config: RealtimeConfig,
        adapter: Arc<dyn TransportAdapter>,
        credentials: Arc<dyn CredentialProvider>,
        invalidator: Arc<dyn CacheInvalidator>,
        signals: Arc<dyn EnvironmentSignals>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let enabled = config.realtime.enabled;
        let (status, _) = watch::channel(ChannelStatus {
            enabled: enabled && signals.is_feature_enabled(),
            ..Default::default()
        });
        let (diagnostics, _) = watch::channel(Diagnostics {
            transport: adapter.kind(),
            ..Default::default()
        });

        LifecycleController {
            inner: Arc::new(Inner {
                config,
                collaborators: Collaborators {
                    adapter,
                    credentials,
                    invalidator,
                },
                signals,
                dispatcher,
                enabled: AtomicBool::new(enabled),
                channel: Mutex::new(None),
                publishers: Publishers {
                    status: Arc::new(status),
                    diagnostics: Arc::new(diagnostics),
                },
                visibility_task: StdMutex::new(None),
            }),
        }
    }

    /// Initial mount: starts watching visibility and connects when enabled
    /// and credentials are valid.
    pub async fn mount(
        config: RealtimeConfig,
        adapter: Arc<dyn TransportAdapter>,
        credentials: Arc<dyn CredentialProvider>,
        invalidator: Arc<dyn CacheInvalidator>,
        signals: Arc<dyn EnvironmentSignals>,
    ) -> Self {
        let controller = Self::new(config, adapter, credentials, invalidator, signals);
        controller.watch_visibility();
        controller.connect_if_ready().await;
        controller
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Opens the channel, spawning it on first use.
    pub async fn connect(&self) -> RealtimeResult<ConnectOutcome> {
        if !self.is_enabled() {
            return Err(RealtimeError::Precondition("realtime updates are disabled".into()));
        }

        let mut channel = self.inner.channel.lock().await;
        if channel.as_ref().map_or(true, ChannelHandle::is_finished) {
            *channel = Some(self.spawn_channel());
        }

        match channel.as_ref() {
            Some(handle) => handle.connect().await,
            None => Err(RealtimeError::ChannelClosed),
        }
    }

    /// Closes the channel. Resolves once it is Closed and no retry is pending.
    pub async fn disconnect(&self) -> RealtimeResult<()> {
        let channel = self.inner.channel.lock().await;
        match channel.as_ref() {
            Some(handle) => handle.disconnect().await,
            None => Ok(()),
        }
    }

    /// Turns realtime updates on or off. Turning off disconnects
    /// unconditionally; turning on connects if credentials are valid.
    pub async fn toggle_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        let effective = self.is_enabled();
        self.inner
            .publishers
            .status
            .send_modify(|status| status.enabled = effective);
        info!(enabled, "Realtime updates toggled");

        if enabled {
            self.connect_if_ready().await;
        } else if let Err(e) = self.disconnect().await {
            warn!(error = %e, "Disconnect on disable failed");
        }
    }

    /// Enabled by the user and by the feature flag.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst) && self.inner.signals.is_feature_enabled()
    }

    /// App came to the foreground.
    pub async fn on_foreground(&self) {
        if self.status().state == ConnectionState::Open {
            return;
        }
        debug!("Foreground with channel not open");
        self.connect_if_ready().await;
    }

    /// Tears everything down: visibility watcher, transport, timers, actor.
    pub async fn unmount(&self) {
        let watcher = self
            .inner
            .visibility_task
            .lock()
            .ok()
            .and_then(|mut task| task.take());
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let handle = self.inner.channel.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        info!("Realtime channel unmounted");
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Current snapshot. `enabled` is read live so a feature-flag change is
    /// visible without a toggle.
    pub fn status(&self) -> ChannelStatus {
        let mut status = self.inner.publishers.status.borrow().clone();
        status.enabled = self.is_enabled();
        status
    }

    /// Change feed for the snapshot. The feature flag has no change signal,
    /// so `enabled` here only moves on construction and `toggle_enabled`;
    /// use [`status`](Self::status) or [`is_enabled`](Self::is_enabled) for
    /// the live value.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.publishers.status.subscribe()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.publishers.diagnostics.borrow().clone()
    }

    pub fn subscribe_diagnostics(&self) -> watch::Receiver<Diagnostics> {
        self.inner.publishers.diagnostics.subscribe()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn connect_if_ready(&self) {
        if !self.is_enabled() {
            debug!("Realtime disabled; not connecting");
            return;
        }
        if !self.inner.collaborators.credentials.is_valid() {
            debug!("Credentials not valid; not connecting");
            return;
        }
        match self.connect().await {
            Ok(outcome) => debug!(?outcome, "Connect requested"),
            Err(e) if e.is_actionable() => warn!(error = %e, "Connect refused"),
            Err(e) => debug!(error = %e, "Connect not started"),
        }
    }

    fn spawn_channel(&self) -> ChannelHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let supervisor = ConnectionSupervisor::new(
            &self.inner.config,
            self.inner.collaborators.clone(),
            events_tx,
            self.inner.publishers.clone(),
        )
        .with_dispatcher(self.inner.dispatcher.clone());

        info!(
            session_id = %supervisor.session_id(),
            transport = %self.inner.collaborators.adapter.kind(),
            "Spawning realtime channel"
        );
        ChannelHandle::spawn(supervisor, events_rx)
    }

    fn watch_visibility(&self) {
        let mut visibility = self.inner.signals.visibility();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while visibility.changed().await.is_ok() {
                if *visibility.borrow_and_update() != Visibility::Foreground {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                LifecycleController { inner }.on_foreground().await;
            }
        });

        if let Ok(mut slot) = self.inner.visibility_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ManualSignals, RecordingInvalidator};
    use crate::testing::{credentials, settle, MockTransport};
    use chorewheel_core::CacheKey;
    use std::time::Duration;

    struct Fixture {
        controller: LifecycleController,
        transport: Arc<MockTransport>,
        signals: Arc<ManualSignals>,
        invalidator: Arc<RecordingInvalidator>,
    }

    async fn mounted(enabled: bool) -> Fixture {
        let mut config = RealtimeConfig::default();
        config.realtime.enabled = enabled;
        let transport = MockTransport::duplex();
        let signals = Arc::new(ManualSignals::new(true));
        let invalidator = Arc::new(RecordingInvalidator::new());

        let controller = LifecycleController::mount(
            config,
            transport.clone(),
            credentials(),
            invalidator.clone(),
            signals.clone(),
        )
        .await;
        settle().await;

        Fixture {
            controller,
            transport,
            signals,
            invalidator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_connects_when_enabled() {
        let f = mounted(true).await;
        assert_eq!(f.transport.open_count(), 1);
        assert_eq!(f.controller.status().state, ConnectionState::Connecting);
        assert!(f.controller.status().enabled);

        f.transport.last().opened();
        settle().await;
        assert_eq!(f.controller.status().state, ConnectionState::Open);
        assert_eq!(f.controller.diagnostics().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_disabled_stays_closed() {
        let f = mounted(false).await;
        assert_eq!(f.transport.open_count(), 0);
        assert!(!f.controller.is_enabled());
        assert!(matches!(
            f.controller.connect().await,
            Err(RealtimeError::Precondition(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feature_flag_gates_enabled() {
        let f = mounted(true).await;
        f.signals.set_feature_enabled(false);
        assert!(!f.controller.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_tracks_feature_flag() {
        let f = mounted(true).await;
        assert!(f.controller.status().enabled);

        f.signals.set_feature_enabled(false);
        assert!(!f.controller.status().enabled);

        f.signals.set_feature_enabled(true);
        assert!(f.controller.status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_off_closes_and_cancels_retry() {
        let f = mounted(true).await;
        f.transport.last().opened();
        settle().await;

        f.controller.toggle_enabled(false).await;
        // Resolved only after the supervisor closed.
        let status = f.controller.status();
        assert_eq!(status.state, ConnectionState::Closed);
        assert!(!status.enabled);
        assert_eq!(f.transport.live_count(), 0);

        // Old transport's close after the toggle must not schedule anything.
        f.transport.events(0).closed(crate::transport::CloseInfo::new(Some(1000), ""));
        settle().await;
        assert!(!f.controller.diagnostics().reconnect_pending);

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(f.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_off_cancels_pending_retry() {
        let f = mounted(true).await;
        f.transport.last().failed("refused");
        settle().await;
        assert!(f.controller.diagnostics().reconnect_pending);

        f.controller.toggle_enabled(false).await;
        assert!(!f.controller.diagnostics().reconnect_pending);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(f.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_on_reconnects() {
        let f = mounted(true).await;
        f.controller.toggle_enabled(false).await;
        f.controller.toggle_enabled(true).await;
        settle().await;

        assert_eq!(f.transport.open_count(), 2);
        assert_eq!(f.transport.live_count(), 1);
        assert!(f.controller.status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_reconnects_when_not_open() {
        let f = mounted(true).await;
        f.controller.disconnect().await.unwrap();
        assert_eq!(f.controller.status().state, ConnectionState::Closed);

        f.signals.set_visibility(Visibility::Background);
        settle().await;
        assert_eq!(f.transport.open_count(), 1);

        f.signals.set_visibility(Visibility::Foreground);
        settle().await;
        assert_eq!(f.transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_while_open_is_noop() {
        let f = mounted(true).await;
        f.transport.last().opened();
        settle().await;

        f.controller.on_foreground().await;
        settle().await;
        assert_eq!(f.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_invalidator() {
        let f = mounted(true).await;
        f.transport.last().opened();
        f.transport
            .last()
            .message(r#"{"type":"chore.completed","data":{"chore":{"id":7}}}"#);
        settle().await;

        let keys = f.invalidator.keys();
        assert!(keys.contains(&CacheKey::Item("chore:7".into())));
        assert!(keys.contains(&CacheKey::Detail("choreDetails:7".into())));
        assert_eq!(
            f.controller.status().last_event.unwrap().kind,
            "chore.completed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_status_sees_transitions() {
        let f = mounted(true).await;
        let mut rx = f.controller.subscribe_status();
        rx.borrow_and_update();

        f.transport.last().opened();
        settle().await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_tears_down() {
        let f = mounted(true).await;
        f.transport.last().opened();
        settle().await;

        f.controller.unmount().await;
        assert_eq!(f.controller.status().state, ConnectionState::Closed);
        assert_eq!(f.transport.live_count(), 0);

        f.signals.set_visibility(Visibility::Background);
        f.signals.set_visibility(Visibility::Foreground);
        settle().await;
        assert_eq!(f.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_unmount_respawns() {
        let f = mounted(true).await;
        f.controller.unmount().await;

        assert_eq!(f.controller.connect().await, Ok(ConnectOutcome::Started));
        assert_eq!(f.transport.open_count(), 2);
    }
}

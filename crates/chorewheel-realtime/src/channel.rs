//! Channel actor: owns the supervisor and serialises everything that
//! touches it.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::error::{RealtimeError, RealtimeResult};
use crate::event::EventReceiver;
use crate::supervisor::{ConnectOutcome, ConnectionSupervisor};

const COMMAND_BUFFER: usize = 16;

enum Command {
    Connect(oneshot::Sender<RealtimeResult<ConnectOutcome>>),
    Disconnect(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for sending commands to a running channel actor.
pub(crate) struct ChannelHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Spawns the actor that owns `supervisor`.
    pub(crate) fn spawn(supervisor: ConnectionSupervisor, events: EventReceiver) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let span = info_span!("realtime_channel", session_id = %supervisor.session_id());
        let task = tokio::spawn(run(supervisor, command_rx, events).instrument(span));
        ChannelHandle { commands, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) async fn connect(&self) -> RealtimeResult<ConnectOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(reply))
            .await
            .map_err(|_| RealtimeError::ChannelClosed)?;
        rx.await.map_err(|_| RealtimeError::ChannelClosed)?
    }

    /// Resolves once the supervisor is Closed and its timers are cancelled.
    pub(crate) async fn disconnect(&self) -> RealtimeResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect(reply))
            .await
            .map_err(|_| RealtimeError::ChannelClosed)?;
        rx.await.map_err(|_| RealtimeError::ChannelClosed)
    }

    /// Disconnects and stops the actor.
    pub(crate) async fn shutdown(self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

async fn run(
    mut supervisor: ConnectionSupervisor,
    mut commands: mpsc::Receiver<Command>,
    mut events: EventReceiver,
) {
    debug!("Channel actor started");

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Connect(reply)) => {
                    let _ = reply.send(supervisor.connect());
                }
                Some(Command::Disconnect(reply)) => {
                    supervisor.disconnect();
                    let _ = reply.send(());
                }
                Some(Command::Shutdown(reply)) => {
                    supervisor.disconnect();
                    let _ = reply.send(());
                    break;
                }
                None => {
                    // Every controller handle is gone.
                    supervisor.disconnect();
                    break;
                }
            },

            Some(event) = events.recv() => {
                supervisor.handle_event(event);
            }
        }
    }

    info!(state = %supervisor.state(), "Channel actor stopped");
}

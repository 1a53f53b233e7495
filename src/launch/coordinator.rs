//! Launch coordination.
//!
//! Sequences one game launch end-to-end: spawn the target, suspend the input
//! router, hand the process to the tracker, and on the tracker's terminal
//! event resume input, re-probe the controller hub and notify the UI. The
//! coordinator is an actor: `NowPlaying` and the router gate are mutated only
//! inside its task, so the launch entry point and the tracker's background
//! poll never race on shared state.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::GameRef;
use crate::controller::hub::HubCommand;
use crate::input::router::RouterGate;
use crate::launch::process_host::ProcessHost;
use crate::launch::tracker::{TrackerEvent, TrackerHandle, TrackerSettings};

#[derive(Debug, Error)]
pub enum LaunchError {
    /// A launch session is already active; one game at a time.
    #[error("a game is already running")]
    AlreadyRunning,

    /// The OS refused to start the process or URI.
    #[error("failed to start game: {0}")]
    SpawnFailed(String),

    /// The coordinator task is gone (shutdown).
    #[error("launch coordinator unavailable")]
    Unavailable,
}

/// Proof of a started launch session.
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    pub game: GameRef,
}

/// Outbound notifications for the UI surface.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    GameEnded { game: GameRef },
}

enum Command {
    Launch {
        game: GameRef,
        reply: oneshot::Sender<Result<LaunchHandle, LaunchError>>,
    },
}

pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    now_playing: watch::Receiver<Option<GameRef>>,
    cancel: CancellationToken,
}

impl CoordinatorHandle {
    /// Spawn the coordinator actor.
    ///
    /// `gate` is the router's suspend/resume channel, `hub_commands` feeds the
    /// controller hub (rescan after a game ends, in case a pad was hot-swapped
    /// mid-session), `events` carries game-ended notifications to the UI.
    pub fn spawn(
        host: Arc<dyn ProcessHost>,
        tracker_settings: TrackerSettings,
        gate: watch::Sender<RouterGate>,
        hub_commands: mpsc::Sender<HubCommand>,
        events: mpsc::Sender<CoordinatorEvent>,
    ) -> CoordinatorHandle {
        let (command_tx, mut command_rx) = mpsc::channel::<Command>(8);
        let (now_playing_tx, now_playing_rx) = watch::channel(None);
        let (tracker_tx, mut tracker_rx) = mpsc::channel::<TrackerEvent>(8);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut active: Option<(GameRef, TrackerHandle)> = None;

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        if let Some((_, tracker)) = active.take() {
                            tracker.stop();
                        }
                        info!("Launch coordinator stopped");
                        break;
                    }
                    Some(command) = command_rx.recv() => match command {
                        Command::Launch { game, reply } => {
                            let result = handle_launch(
                                game,
                                &mut active,
                                &host,
                                &tracker_settings,
                                &gate,
                                &tracker_tx,
                            );
                            let _ = reply.send(result);
                            let _ = now_playing_tx.send(active.as_ref().map(|(g, _)| g.clone()));
                        }
                    },
                    Some(event) = tracker_rx.recv() => match event {
                        TrackerEvent::Ended { game } => {
                            info!("Game ended: {}", game.name);
                            active = None;
                            let _ = now_playing_tx.send(None);
                            if gate.send(RouterGate::Active).is_err() {
                                warn!("Router gate receiver dropped");
                            }
                            // A pad may have been plugged or swapped while
                            // input was suspended.
                            if let Err(e) = hub_commands.try_send(HubCommand::Rescan) {
                                warn!("Could not request hub rescan: {}", e);
                            }
                            if let Err(e) = events.try_send(CoordinatorEvent::GameEnded { game }) {
                                warn!("Dropped game-ended notification: {}", e);
                            }
                        }
                    },
                }
            }
        });

        CoordinatorHandle {
            commands: command_tx,
            now_playing: now_playing_rx,
            cancel,
        }
    }

    /// Start a game. Rejected with [`LaunchError::AlreadyRunning`] while a
    /// session is active.
    pub async fn launch(&self, game: GameRef) -> Result<LaunchHandle, LaunchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Launch {
                game,
                reply: reply_tx,
            })
            .await
            .map_err(|_| LaunchError::Unavailable)?;
        reply_rx.await.map_err(|_| LaunchError::Unavailable)?
    }

    /// The game currently running, if any.
    pub fn now_playing(&self) -> Option<GameRef> {
        self.now_playing.borrow().clone()
    }

    pub fn subscribe_now_playing(&self) -> watch::Receiver<Option<GameRef>> {
        self.now_playing.clone()
    }

    /// Stop the coordinator and abandon any in-flight session. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn handle_launch(
    game: GameRef,
    active: &mut Option<(GameRef, TrackerHandle)>,
    host: &Arc<dyn ProcessHost>,
    tracker_settings: &TrackerSettings,
    gate: &watch::Sender<RouterGate>,
    tracker_tx: &mpsc::Sender<TrackerEvent>,
) -> Result<LaunchHandle, LaunchError> {
    if let Some((running, _)) = active.as_ref() {
        warn!(
            "Rejected launch of {}: {} is already running",
            game.name, running.name
        );
        return Err(LaunchError::AlreadyRunning);
    }

    info!("Launching {}", game.name);
    let spawned = match host.spawn(&game.target) {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("Spawn failed for {}: {}", game.name, e);
            return Err(LaunchError::SpawnFailed(e.to_string()));
        }
    };

    if gate.send(RouterGate::Suspended).is_err() {
        warn!("Router gate receiver dropped");
    }

    let tracker = TrackerHandle::spawn(
        game.clone(),
        spawned.initial_pid,
        host.clone(),
        tracker_settings.clone(),
        tracker_tx.clone(),
    );
    *active = Some((game.clone(), tracker));
    Ok(LaunchHandle { game })
}

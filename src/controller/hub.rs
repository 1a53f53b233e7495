//! Controller hub: presence detection and arbitration across pad drivers.
//!
//! The hub owns every [`ControllerDriver`] and guarantees that at most one of
//! them is authoritative at any instant. A slow presence scan re-probes each
//! driver; a faster tick publishes the active driver's snapshot through a
//! watch channel. Hot-swap transitions are emitted as [`HubEvent`]s only when
//! the authoritative kind actually changes.

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::driver::{ControllerDriver, ControllerKind, ControllerSnapshot};

/// Hub timing knobs.
#[derive(Clone, Debug)]
pub struct HubSettings {
    /// Interval between published snapshots (the input tick rate feeds off
    /// this stream).
    pub snapshot_interval_ms: u64,
    /// Interval between full presence re-probes.
    pub presence_scan_interval_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 50,
            presence_scan_interval_ms: 1000,
        }
    }
}

/// Which kind currently drives input, and when it took over.
///
/// Owned exclusively by the hub; everything else sees read-only copies in
/// [`HubOutput`]. The switch timestamp lets consumers reason about recent
/// hot-swaps instead of reacting to every transition edge.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveControllerState {
    pub kind: ControllerKind,
    pub last_switched: DateTime<Local>,
}

/// Latest-value output published by the hub task.
#[derive(Clone, Debug, Default)]
pub struct HubOutput {
    pub active: Option<ActiveControllerState>,
    pub snapshot: ControllerSnapshot,
}

/// Hot-swap transition events; nothing is emitted on a stable tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HubEvent {
    Switched(ControllerKind),
    AllDisconnected,
}

#[derive(Debug)]
pub enum HubCommand {
    /// Re-run presence detection immediately (used after a game ends, when a
    /// pad may have been hot-swapped mid-session).
    Rescan,
}

pub(crate) struct ControllerHub {
    drivers: Vec<Box<dyn ControllerDriver>>,
    active: Option<ActiveControllerState>,
}

impl ControllerHub {
    pub(crate) fn new(drivers: Vec<Box<dyn ControllerDriver>>) -> Self {
        Self {
            drivers,
            active: None,
        }
    }

    pub(crate) fn active(&self) -> Option<&ActiveControllerState> {
        self.active.as_ref()
    }

    /// Re-probe every driver and re-run selection. Returns an event only when
    /// the authoritative kind changed.
    pub(crate) fn scan(&mut self) -> Option<HubEvent> {
        let mut winner: Option<ControllerKind> = None;
        for driver in &mut self.drivers {
            if driver.is_connected() {
                let kind = driver.kind();
                if winner.map(|w| kind.priority() < w.priority()).unwrap_or(true) {
                    winner = Some(kind);
                }
            }
        }

        let current = self.active.as_ref().map(|a| a.kind);
        if winner == current {
            return None;
        }
        match winner {
            Some(kind) => {
                info!("Active controller switched to {}", kind);
                self.active = Some(ActiveControllerState {
                    kind,
                    last_switched: Local::now(),
                });
                Some(HubEvent::Switched(kind))
            }
            None => {
                warn!("All controllers disconnected");
                self.active = None;
                Some(HubEvent::AllDisconnected)
            }
        }
    }

    /// Poll the active driver. A failed or disconnected read triggers an
    /// immediate re-selection instead of waiting for the next scheduled scan.
    pub(crate) fn current_snapshot(&mut self) -> (ControllerSnapshot, Option<HubEvent>) {
        let Some(kind) = self.active.as_ref().map(|a| a.kind) else {
            return (ControllerSnapshot::DISCONNECTED, None);
        };

        let snapshot = self
            .drivers
            .iter_mut()
            .find(|d| d.kind() == kind)
            .map(|d| d.poll_snapshot())
            .unwrap_or(ControllerSnapshot::DISCONNECTED);

        if snapshot.connected {
            return (snapshot, None);
        }

        debug!("Active {} stopped reporting, re-running selection", kind);
        let event = self.scan();
        let snapshot = match self.active.as_ref().map(|a| a.kind) {
            Some(new_kind) => self
                .drivers
                .iter_mut()
                .find(|d| d.kind() == new_kind)
                .map(|d| d.poll_snapshot())
                .unwrap_or(ControllerSnapshot::DISCONNECTED),
            None => ControllerSnapshot::DISCONNECTED,
        };
        (snapshot, event)
    }
}

/// Handle for the spawned hub task.
pub struct HubHandle {
    output: watch::Receiver<HubOutput>,
    commands: mpsc::Sender<HubCommand>,
    cancel: CancellationToken,
}

impl HubHandle {
    /// Spawn the hub task over the given drivers. Transition events go out on
    /// `events`; the returned handle exposes the snapshot stream, a rescan
    /// command and idempotent shutdown.
    pub fn spawn(
        drivers: Vec<Box<dyn ControllerDriver>>,
        settings: HubSettings,
        events: mpsc::Sender<HubEvent>,
    ) -> HubHandle {
        let (output_tx, output_rx) = watch::channel(HubOutput::default());
        let (command_tx, mut command_rx) = mpsc::channel::<HubCommand>(8);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        info!(
            "Starting controller hub ({} drivers, snapshot {}ms, presence scan {}ms)",
            drivers.len(),
            settings.snapshot_interval_ms,
            settings.presence_scan_interval_ms
        );

        tokio::spawn(async move {
            let mut hub = ControllerHub::new(drivers);
            let mut snapshot_timer = tokio::time::interval(std::time::Duration::from_millis(
                settings.snapshot_interval_ms,
            ));
            let mut presence_timer = tokio::time::interval(std::time::Duration::from_millis(
                settings.presence_scan_interval_ms,
            ));

            let emit = |event: Option<HubEvent>| {
                if let Some(event) = event {
                    if let Err(e) = events.try_send(event) {
                        warn!("Dropped hub event: {}", e);
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        info!("Controller hub stopped");
                        break;
                    }
                    Some(command) = command_rx.recv() => match command {
                        HubCommand::Rescan => {
                            debug!("Rescan requested");
                            emit(hub.scan());
                        }
                    },
                    _ = presence_timer.tick() => {
                        emit(hub.scan());
                    }
                    _ = snapshot_timer.tick() => {
                        let (snapshot, event) = hub.current_snapshot();
                        emit(event);
                        let _ = output_tx.send(HubOutput {
                            active: hub.active().cloned(),
                            snapshot,
                        });
                    }
                }
            }
        });

        HubHandle {
            output: output_rx,
            commands: command_tx,
            cancel,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HubOutput> {
        self.output.clone()
    }

    pub fn rescan(&self) {
        if let Err(e) = self.commands.try_send(HubCommand::Rescan) {
            warn!("Could not queue hub rescan: {}", e);
        }
    }

    /// Command endpoint for other subsystems (the launch coordinator asks
    /// for a rescan when a game ends).
    pub fn command_sender(&self) -> mpsc::Sender<HubCommand> {
        self.commands.clone()
    }

    /// Stop the hub task. Safe to call repeatedly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

//! Input router: turns the hub's snapshot stream into discrete intents.
//!
//! Runs a fixed-rate tick. Movement is rate-limited by wall-clock elapsed
//! time rather than tick count, so the repeat rate stays stable when the
//! polling rate changes. Action buttons fire on the pressed edge only,
//! compared against the previous tick's latched snapshot. The whole router
//! gates on game-running state: while a launch session is active every tick
//! is a no-op.

use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::driver::{ButtonSet, ControllerSnapshot, LogicalButton};
use crate::controller::hub::HubOutput;
use crate::input::intent::{IntentKind, NavigationIntent};

#[derive(Clone, Debug)]
pub struct RouterSettings {
    pub tick_interval_ms: u64,
    /// Minimum wall-clock time between emitted Move intents while the stick
    /// stays deflected. Without this, a held stick scrolls once per tick.
    pub movement_delay_ms: u64,
    /// Dead-zone threshold on the normalized i16 stick range.
    pub stick_threshold: i16,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            movement_delay_ms: 150,
            stick_threshold: 8000,
        }
    }
}

/// Suspend/resume gate driven by the launch coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RouterGate {
    #[default]
    Active,
    Suspended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RouterState {
    Idle,
    Active,
    Suspended,
}

pub struct InputRouter {
    settings: RouterSettings,
    state: RouterState,
    prev_buttons: ButtonSet,
    last_move_at: Instant,
}

impl InputRouter {
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            settings,
            state: RouterState::Idle,
            prev_buttons: Default::default(),
            last_move_at: Instant::now(),
        }
    }

    /// Apply a gate change from the coordinator.
    pub fn set_gate(&mut self, gate: RouterGate, now: Instant) {
        match (gate, self.state) {
            (RouterGate::Suspended, RouterState::Suspended) => {}
            (RouterGate::Suspended, _) => {
                info!("Input suspended (game running)");
                self.state = RouterState::Suspended;
            }
            (RouterGate::Active, RouterState::Suspended) => {
                info!("Input resumed");
                self.state = RouterState::Active;
                // Fresh movement window so a deflected stick does not scroll
                // the instant a game closes.
                self.last_move_at = now;
            }
            (RouterGate::Active, _) => {}
        }
    }

    /// One router tick. Returns the intents to deliver this tick (usually
    /// zero or one; a simultaneous move and button press can produce two).
    pub fn handle_tick(
        &mut self,
        snapshot: &ControllerSnapshot,
        now: Instant,
    ) -> Vec<NavigationIntent> {
        if self.state == RouterState::Idle && snapshot.connected {
            info!("Controller connected, input router active");
            self.state = RouterState::Active;
            self.last_move_at = now;
        }

        if self.state != RouterState::Active {
            // Keep latching so no stale edge fires on resume.
            self.prev_buttons = snapshot.buttons;
            return Vec::new();
        }

        if !snapshot.connected {
            self.prev_buttons = snapshot.buttons;
            return Vec::new();
        }

        let mut intents = Vec::new();

        let direction = self.movement_direction(snapshot);
        if direction != 0 {
            let elapsed = now.duration_since(self.last_move_at).as_millis() as u64;
            if elapsed >= self.settings.movement_delay_ms {
                intents.push(NavigationIntent::now(IntentKind::Move(direction)));
                self.last_move_at = now;
            }
        }

        for button in snapshot.buttons.newly_pressed(self.prev_buttons) {
            let kind = match button {
                LogicalButton::Confirm => Some(IntentKind::Activate),
                LogicalButton::Cancel => Some(IntentKind::Cancel),
                LogicalButton::Special => Some(IntentKind::ToggleSearch),
                LogicalButton::Menu => Some(IntentKind::OpenMenu),
                // Horizontal d-pad feeds the rate-limited movement path
                // above; vertical d-pad is reserved for the UI surface.
                _ => None,
            };
            if let Some(kind) = kind {
                debug!("Button edge {:?} -> {:?}", button, kind);
                intents.push(NavigationIntent::now(kind));
            }
        }

        self.prev_buttons = snapshot.buttons;
        intents
    }

    fn movement_direction(&self, snapshot: &ControllerSnapshot) -> i32 {
        if snapshot.stick_x > self.settings.stick_threshold {
            1
        } else if snapshot.stick_x < -self.settings.stick_threshold {
            -1
        } else if snapshot.buttons.contains(LogicalButton::DPadRight) {
            1
        } else if snapshot.buttons.contains(LogicalButton::DPadLeft) {
            -1
        } else {
            0
        }
    }
}

/// Handle for the spawned router task.
pub struct RouterHandle {
    cancel: CancellationToken,
}

impl RouterHandle {
    /// Spawn the router tick loop: read the hub's latest snapshot each tick,
    /// honor the coordinator's gate, deliver intents on `intents`.
    pub fn spawn(
        settings: RouterSettings,
        mut hub_output: watch::Receiver<HubOutput>,
        gate: watch::Receiver<RouterGate>,
        intents: mpsc::Sender<NavigationIntent>,
    ) -> RouterHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        info!(
            "Starting input router (tick {}ms, movement delay {}ms, threshold {})",
            settings.tick_interval_ms, settings.movement_delay_ms, settings.stick_threshold
        );

        tokio::spawn(async move {
            let mut router = InputRouter::new(settings.clone());
            let mut timer = tokio::time::interval(std::time::Duration::from_millis(
                settings.tick_interval_ms,
            ));

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        info!("Input router stopped");
                        break;
                    }
                    _ = timer.tick() => {}
                }

                let now = Instant::now();
                router.set_gate(*gate.borrow(), now);

                let snapshot = hub_output.borrow_and_update().snapshot;
                for intent in router.handle_tick(&snapshot, now) {
                    if let Err(e) = intents.try_send(intent) {
                        warn!("Dropped navigation intent: {}", e);
                    }
                }
            }
        });

        RouterHandle { cancel }
    }

    /// Stop the router task. Safe to call repeatedly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(stick_x: i16, buttons: &[LogicalButton]) -> ControllerSnapshot {
        ControllerSnapshot {
            connected: true,
            stick_x,
            stick_y: 0,
            buttons: buttons.iter().copied().collect(),
        }
    }

    fn router() -> (InputRouter, Instant) {
        let router = InputRouter::new(RouterSettings::default());
        (router, Instant::now())
    }

    fn moves(intents: &[NavigationIntent]) -> usize {
        intents
            .iter()
            .filter(|i| matches!(i.kind, IntentKind::Move(_)))
            .count()
    }

    #[test]
    fn held_stick_produces_wall_clock_limited_moves() {
        // 500ms of constant deflection at a 50ms tick with a 150ms movement
        // delay: moves at t=150/300/450, exactly three.
        let (mut router, start) = router();
        let snap = snapshot(25_000, &[]);

        let mut total = 0;
        for tick in 0..10 {
            let now = start + Duration::from_millis(tick * 50);
            total += moves(&router.handle_tick(&snap, now));
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn move_count_is_stable_under_polling_rate_changes() {
        // Same 500ms deflection sampled at 10ms instead of 50ms still yields
        // three moves.
        let (mut router, start) = router();
        let snap = snapshot(25_000, &[]);

        let mut total = 0;
        for tick in 0..50 {
            let now = start + Duration::from_millis(tick * 10);
            total += moves(&router.handle_tick(&snap, now));
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn stick_below_threshold_never_moves() {
        let (mut router, start) = router();
        let snap = snapshot(5_000, &[]);

        for tick in 0..20 {
            let now = start + Duration::from_millis(tick * 50);
            assert!(router.handle_tick(&snap, now).is_empty());
        }
    }

    #[test]
    fn left_deflection_moves_negative() {
        let (mut router, start) = router();
        let snap = snapshot(-25_000, &[]);

        let intents = router.handle_tick(&snap, start + Duration::from_millis(200));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Move(-1));
    }

    #[test]
    fn dpad_movement_uses_the_same_rate_limit() {
        let (mut router, start) = router();
        let snap = snapshot(0, &[LogicalButton::DPadRight]);

        let mut total = 0;
        for tick in 0..10 {
            let now = start + Duration::from_millis(tick * 50);
            total += moves(&router.handle_tick(&snap, now));
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn held_button_fires_exactly_one_intent() {
        let (mut router, start) = router();
        let snap = snapshot(0, &[LogicalButton::Confirm]);

        let mut activates = 0;
        for tick in 0..8 {
            let now = start + Duration::from_millis(tick * 50);
            activates += router
                .handle_tick(&snap, now)
                .iter()
                .filter(|i| i.kind == IntentKind::Activate)
                .count();
        }
        assert_eq!(activates, 1);

        // Release and press again: one more edge.
        let released = snapshot(0, &[]);
        router.handle_tick(&released, start + Duration::from_millis(400));
        let pressed = router.handle_tick(&snap, start + Duration::from_millis(450));
        assert_eq!(pressed.len(), 1);
        assert_eq!(pressed[0].kind, IntentKind::Activate);
    }

    #[test]
    fn action_buttons_map_to_their_intents() {
        let cases = [
            (LogicalButton::Cancel, IntentKind::Cancel),
            (LogicalButton::Special, IntentKind::ToggleSearch),
            (LogicalButton::Menu, IntentKind::OpenMenu),
        ];
        for (button, expected) in cases {
            let (mut router, start) = router();
            let intents = router.handle_tick(&snapshot(0, &[button]), start);
            assert_eq!(intents.len(), 1, "{:?}", button);
            assert_eq!(intents[0].kind, expected);
        }
    }

    #[test]
    fn suspended_router_emits_nothing() {
        let (mut router, start) = router();
        // Activate first so suspension is the only gate.
        router.handle_tick(&snapshot(0, &[]), start);
        router.set_gate(RouterGate::Suspended, start);

        let busy = snapshot(30_000, &[LogicalButton::Confirm, LogicalButton::Menu]);
        for tick in 0..20 {
            let now = start + Duration::from_millis(tick * 50);
            assert!(router.handle_tick(&busy, now).is_empty());
        }
    }

    #[test]
    fn resume_does_not_replay_buttons_held_during_suspension() {
        let (mut router, start) = router();
        router.handle_tick(&snapshot(0, &[]), start);
        router.set_gate(RouterGate::Suspended, start);

        let held = snapshot(0, &[LogicalButton::Confirm]);
        router.handle_tick(&held, start + Duration::from_millis(50));

        router.set_gate(RouterGate::Active, start + Duration::from_millis(100));
        // Still held on the first active tick: no edge, it was latched while
        // suspended.
        let intents = router.handle_tick(&held, start + Duration::from_millis(150));
        assert!(intents.is_empty());
    }

    #[test]
    fn disconnected_snapshots_are_discarded() {
        let (mut router, start) = router();
        router.handle_tick(&snapshot(0, &[]), start);

        let gone = ControllerSnapshot::DISCONNECTED;
        assert!(router
            .handle_tick(&gone, start + Duration::from_millis(50))
            .is_empty());
    }

    #[test]
    fn idle_until_first_connected_snapshot() {
        let (mut router, start) = router();
        // Disconnected from the start: stays idle, no intents.
        assert!(router
            .handle_tick(&ControllerSnapshot::DISCONNECTED, start)
            .is_empty());

        // First connected snapshot activates the router; a held button at
        // that moment is a fresh edge.
        let intents = router.handle_tick(
            &snapshot(0, &[LogicalButton::Confirm]),
            start + Duration::from_millis(50),
        );
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Activate);
    }
}

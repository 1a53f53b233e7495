//! Game-process lifetime tracking.
//!
//! Answers "has the user's game session ended?" exactly once per launch,
//! despite three realities that break the naive wait-on-child approach:
//! storefront URI launches never yield a usable child handle, games spawn
//! cooperating processes, and anti-cheat services outlive the game window.
//!
//! Each launch runs one [`LaunchSession`] state machine, `Starting ->
//! Confirmed -> Ended`, driven by a poll loop. While `Starting`, indirect
//! launches diff two process-table snapshots taken after grace windows to
//! discover the real game processes. `Confirmed` is entered once a tracked
//! process owns a visible main window. `Ended` fires after the tracked set
//! stays empty (or anti-cheat-only) for a sustained run of polls.

use statum::{machine, state};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::GameRef;
use crate::launch::process_host::{ProcessDescriptor, ProcessHost, ProcessHostError};

/// Tracker tunables. Every threshold here was tuned empirically in the field;
/// the defaults are starting points, not invariants.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub poll_interval_ms: u64,
    /// Grace before the first discovery snapshot of an indirect launch.
    pub discovery_grace_ms: u64,
    /// Additional settle time before the second snapshot; the diff of the two
    /// is the candidate set of freshly started game processes.
    pub discovery_settle_ms: u64,
    /// Consecutive empty liveness polls after confirmation that end a session.
    pub empty_polls_to_end: u32,
    /// Same, once an anti-cheat process was ever observed - those services
    /// persist briefly after the game dies and must not trigger an early end.
    pub empty_polls_with_anti_cheat: u32,
    /// Absolute ceiling on consecutive empty polls, confirmed or not.
    pub empty_polls_ceiling: u32,
    /// Consecutive failed process-table queries before assuming the session
    /// ended rather than polling forever.
    pub inconclusive_polls_to_end: u32,
    pub inconclusive_polls_with_anti_cheat: u32,
    /// Substrings identifying anti-cheat service processes.
    pub anti_cheat_names: Vec<String>,
    /// Substrings identifying storefront/launcher/installer processes that
    /// must never be mistaken for the game during discovery.
    pub launcher_names: Vec<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            discovery_grace_ms: 4000,
            discovery_settle_ms: 3000,
            empty_polls_to_end: 5,
            empty_polls_with_anti_cheat: 15,
            empty_polls_ceiling: 20,
            inconclusive_polls_to_end: 10,
            inconclusive_polls_with_anti_cheat: 15,
            anti_cheat_names: [
                "easyanticheat",
                "battleye",
                "vanguard",
                "faceit",
                "punkbuster",
                "xigncode",
                "nprotect",
                "eac",
                "be",
            ]
            .map(String::from)
            .to_vec(),
            launcher_names: [
                "steam",
                "steamwebhelper",
                "steamservice",
                "gameoverlayui",
                "launcher",
                "unins",
                "setup",
                "installer",
                "redist",
                "crashhandler",
                "helper",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl TrackerSettings {
    fn first_discovery_poll(&self) -> u32 {
        (self.discovery_grace_ms / self.poll_interval_ms.max(1)).max(1) as u32
    }

    fn second_discovery_poll(&self) -> u32 {
        self.first_discovery_poll()
            + (self.discovery_settle_ms / self.poll_interval_ms.max(1)).max(1) as u32
    }
}

/// Terminal notification; sent exactly once per session.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Ended { game: GameRef },
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Starting,
    Confirmed,
    Ended,
}

#[machine]
#[derive(Debug)]
pub struct LaunchSession<S: SessionPhase> {
    game: GameRef,
    settings: TrackerSettings,
    match_token: String,
    install_token: Option<String>,
    tracked: HashSet<u32>,
    baseline: Option<HashSet<u32>>,
    anti_cheat_seen: bool,
    empty_checks: u32,
    inconclusive_checks: u32,
    polls: u32,
}

pub(crate) enum StartingStep {
    Continue(LaunchSession<Starting>),
    Confirmed(LaunchSession<Confirmed>),
    Ended(LaunchSession<Ended>),
}

pub(crate) enum ConfirmedStep {
    Continue(LaunchSession<Confirmed>),
    Ended(LaunchSession<Ended>),
}

impl<S: SessionPhase> LaunchSession<S> {
    /// Drop dead pids, then (re-)adopt every live process that matches the
    /// game or an anti-cheat pattern. Matching every poll instead of only at
    /// discovery time is what picks up late-spawned helper processes of
    /// multi-process titles.
    fn refresh_tracked(&mut self, table: &[ProcessDescriptor]) {
        let live: HashSet<u32> = table.iter().map(|p| p.pid).collect();
        self.tracked.retain(|pid| live.contains(pid));

        for process in table {
            if name_matches_any(&process.name, &self.settings.anti_cheat_names) {
                if self.tracked.insert(process.pid) {
                    debug!("Tracking anti-cheat process {} ({})", process.name, process.pid);
                }
                self.anti_cheat_seen = true;
            } else if self.matches_game(&process.name) {
                if self.tracked.insert(process.pid) {
                    debug!("Tracking game process {} ({})", process.name, process.pid);
                }
            }
        }
    }

    fn matches_game(&self, name: &str) -> bool {
        (!self.match_token.is_empty() && name.contains(&self.match_token))
            || self
                .install_token
                .as_deref()
                .map(|token| !token.is_empty() && name.contains(token))
                .unwrap_or(false)
    }

    /// A tracked, non-anti-cheat process owning a visible main window - the
    /// signal that the game itself (not a splash or launcher) is up.
    fn game_window_visible(&self, table: &[ProcessDescriptor]) -> bool {
        table.iter().any(|p| {
            self.tracked.contains(&p.pid)
                && p.has_main_window
                && !name_matches_any(&p.name, &self.settings.anti_cheat_names)
        })
    }

    /// Anti-cheat survivors do not count as "game still running".
    fn only_anti_cheat_remains(&self, table: &[ProcessDescriptor]) -> bool {
        let names: HashMap<u32, &str> = table.iter().map(|p| (p.pid, p.name.as_str())).collect();
        !self.tracked.is_empty()
            && self.tracked.iter().all(|pid| {
                names
                    .get(pid)
                    .map(|name| name_matches_any(name, &self.settings.anti_cheat_names))
                    .unwrap_or(true)
            })
    }

    fn inconclusive_limit(&self) -> u32 {
        if self.anti_cheat_seen {
            self.settings.inconclusive_polls_with_anti_cheat
        } else {
            self.settings.inconclusive_polls_to_end
        }
    }
}

impl LaunchSession<Starting> {
    pub(crate) fn begin(
        game: GameRef,
        initial_pid: Option<u32>,
        settings: TrackerSettings,
    ) -> Self {
        let match_token = game.match_token();
        let install_token = game.install_dir_token();
        let tracked = initial_pid.into_iter().collect();
        Self::new(
            game,
            settings,
            match_token,
            install_token,
            tracked,
            None,
            false,
            0,
            0,
            0,
        )
    }

    pub(crate) fn poll(
        mut self,
        table: Result<Vec<ProcessDescriptor>, ProcessHostError>,
    ) -> StartingStep {
        self.polls += 1;

        let table = match table {
            Ok(table) => table,
            Err(e) => {
                self.inconclusive_checks += 1;
                warn!(
                    "Process query failed while starting ({}/{}): {}",
                    self.inconclusive_checks,
                    self.inconclusive_limit(),
                    e
                );
                if self.inconclusive_checks >= self.inconclusive_limit() {
                    return StartingStep::Ended(self.transition());
                }
                return StartingStep::Continue(self);
            }
        };
        self.inconclusive_checks = 0;

        if self.game.is_indirect() {
            self.run_discovery(&table);
        }
        self.refresh_tracked(&table);

        if self.game_window_visible(&table) {
            info!("{} confirmed running (main window visible)", self.game.name);
            // Liveness results before confirmation are unreliable; start the
            // empty-run accounting from scratch.
            self.empty_checks = 0;
            return StartingStep::Confirmed(self.transition());
        }

        if self.tracked.is_empty() {
            self.empty_checks += 1;
        } else {
            self.empty_checks = 0;
        }
        if self.empty_checks >= self.settings.empty_polls_ceiling {
            warn!(
                "{} never confirmed after {} empty polls, assuming ended",
                self.game.name, self.empty_checks
            );
            return StartingStep::Ended(self.transition());
        }

        StartingStep::Continue(self)
    }

    /// Indirect launches: snapshot the process table after a grace window,
    /// snapshot again after a settle window, and adopt the genuinely new
    /// processes that look like a game rather than storefront plumbing.
    fn run_discovery(&mut self, table: &[ProcessDescriptor]) {
        if self.polls == self.settings.first_discovery_poll() {
            self.baseline = Some(table.iter().map(|p| p.pid).collect());
            debug!("Discovery baseline captured ({} processes)", table.len());
        } else if self.polls == self.settings.second_discovery_poll() {
            let Some(baseline) = self.baseline.take() else {
                return;
            };
            for process in table {
                if baseline.contains(&process.pid) {
                    continue;
                }
                if name_matches_any(&process.name, &self.settings.launcher_names)
                    || name_matches_any(&process.name, &self.settings.anti_cheat_names)
                {
                    continue;
                }
                // New, not storefront plumbing: a window owner is almost
                // certainly the game; windowless newcomers still get adopted
                // as possible helper processes.
                if self.tracked.insert(process.pid) {
                    info!(
                        "Discovered new process {} ({}) window={}",
                        process.name, process.pid, process.has_main_window
                    );
                }
            }
        }
    }
}

impl LaunchSession<Confirmed> {
    pub(crate) fn poll(
        mut self,
        table: Result<Vec<ProcessDescriptor>, ProcessHostError>,
    ) -> ConfirmedStep {
        self.polls += 1;

        let table = match table {
            Ok(table) => table,
            Err(e) => {
                self.inconclusive_checks += 1;
                warn!(
                    "Process query failed while running ({}/{}): {}",
                    self.inconclusive_checks,
                    self.inconclusive_limit(),
                    e
                );
                if self.inconclusive_checks >= self.inconclusive_limit() {
                    return ConfirmedStep::Ended(self.transition());
                }
                return ConfirmedStep::Continue(self);
            }
        };
        self.inconclusive_checks = 0;

        self.refresh_tracked(&table);

        let effectively_empty = self.tracked.is_empty() || self.only_anti_cheat_remains(&table);
        if effectively_empty {
            self.empty_checks += 1;
        } else {
            self.empty_checks = 0;
        }

        let required = if self.anti_cheat_seen {
            self.settings.empty_polls_with_anti_cheat
        } else {
            self.settings.empty_polls_to_end
        };
        if self.empty_checks >= required || self.empty_checks >= self.settings.empty_polls_ceiling {
            info!(
                "{} ended after {} empty polls (anti-cheat seen: {})",
                self.game.name, self.empty_checks, self.anti_cheat_seen
            );
            return ConfirmedStep::Ended(self.transition());
        }

        ConfirmedStep::Continue(self)
    }
}

impl LaunchSession<Ended> {
    pub(crate) fn game(&self) -> GameRef {
        self.game.clone()
    }
}

fn name_matches_any(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| name.contains(p.as_str()))
}

enum Phase {
    Starting(LaunchSession<Starting>),
    Confirmed(LaunchSession<Confirmed>),
}

/// Handle for one spawned tracking task.
pub struct TrackerHandle {
    cancel: CancellationToken,
}

impl TrackerHandle {
    /// Spawn the poll loop for one launch session. `TrackerEvent::Ended` is
    /// delivered exactly once on `events`; cancelling the handle abandons the
    /// session without an event.
    pub fn spawn(
        game: GameRef,
        initial_pid: Option<u32>,
        host: Arc<dyn ProcessHost>,
        settings: TrackerSettings,
        events: mpsc::Sender<TrackerEvent>,
    ) -> TrackerHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        info!(
            "Tracking launch of {} (initial pid {:?}, indirect: {})",
            game.name,
            initial_pid,
            game.is_indirect()
        );

        tokio::spawn(async move {
            let poll_interval = std::time::Duration::from_millis(settings.poll_interval_ms);
            let mut timer = tokio::time::interval(poll_interval);
            // First tick fires immediately; skip it so the game gets one full
            // interval to come up before the first look at the process table.
            timer.tick().await;

            let mut phase = Phase::Starting(LaunchSession::begin(game, initial_pid, settings));
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        info!("Tracking cancelled");
                        return;
                    }
                    _ = timer.tick() => {}
                }

                let table = host.enumerate();
                phase = match phase {
                    Phase::Starting(session) => match session.poll(table) {
                        StartingStep::Continue(session) => Phase::Starting(session),
                        StartingStep::Confirmed(session) => Phase::Confirmed(session),
                        StartingStep::Ended(session) => {
                            let _ = events.send(TrackerEvent::Ended { game: session.game() }).await;
                            return;
                        }
                    },
                    Phase::Confirmed(session) => match session.poll(table) {
                        ConfirmedStep::Continue(session) => Phase::Confirmed(session),
                        ConfirmedStep::Ended(session) => {
                            let _ = events.send(TrackerEvent::Ended { game: session.game() }).await;
                            return;
                        }
                    },
                };
            }
        });

        TrackerHandle { cancel }
    }

    /// Stop tracking without firing the end event. Safe to call repeatedly,
    /// including after the session already ended.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LaunchTarget;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn direct_game() -> GameRef {
        GameRef {
            name: "Hollow Knight".into(),
            app_id: None,
            target: LaunchTarget::Executable(PathBuf::from(
                "C:/Steam/steamapps/common/hollowknight/hollow_knight.exe",
            )),
        }
    }

    fn steam_game() -> GameRef {
        GameRef {
            name: "Portal 2".into(),
            app_id: Some("620".into()),
            target: LaunchTarget::Uri("steam://rungameid/620".into()),
        }
    }

    fn proc(pid: u32, name: &str, has_main_window: bool) -> ProcessDescriptor {
        ProcessDescriptor {
            pid,
            parent: 0,
            name: name.into(),
            has_main_window,
        }
    }

    fn settings() -> TrackerSettings {
        TrackerSettings::default()
    }

    fn confirm(
        session: LaunchSession<Starting>,
        table: Vec<ProcessDescriptor>,
    ) -> LaunchSession<Confirmed> {
        match session.poll(Ok(table)) {
            StartingStep::Confirmed(session) => session,
            _ => panic!("expected confirmation"),
        }
    }

    #[test]
    fn direct_launch_confirms_once_window_appears() {
        let session = LaunchSession::begin(direct_game(), Some(100), settings());

        // Still loading: process alive but windowless.
        let session = match session.poll(Ok(vec![proc(100, "hollow_knight", false)])) {
            StartingStep::Continue(session) => session,
            _ => panic!("should keep starting while windowless"),
        };

        match session.poll(Ok(vec![proc(100, "hollow_knight", true)])) {
            StartingStep::Confirmed(_) => {}
            _ => panic!("window should confirm the session"),
        }
    }

    #[test]
    fn confirmed_session_ends_after_sustained_empty_polls() {
        let session = LaunchSession::begin(direct_game(), Some(100), settings());
        let mut session = confirm(session, vec![proc(100, "hollow_knight", true)]);

        // Process gone: ends exactly at the default threshold of 5.
        for i in 1..=5 {
            session = match session.poll(Ok(vec![])) {
                ConfirmedStep::Continue(session) => {
                    assert!(i < 5, "should have ended at poll 5");
                    session
                }
                ConfirmedStep::Ended(done) => {
                    assert_eq!(i, 5);
                    assert_eq!(done.game().name, "Hollow Knight");
                    return;
                }
            };
        }
        panic!("session never ended");
    }

    #[test]
    fn brief_process_table_gap_does_not_end_a_live_game() {
        let session = LaunchSession::begin(direct_game(), Some(100), settings());
        let mut session = confirm(session, vec![proc(100, "hollow_knight", true)]);

        for _ in 0..3 {
            session = match session.poll(Ok(vec![])) {
                ConfirmedStep::Continue(session) => session,
                _ => panic!("ended too early"),
            };
        }
        // The game shows back up (e.g. exe restart during a mode switch):
        // the empty run resets.
        session = match session.poll(Ok(vec![proc(100, "hollow_knight", false)])) {
            ConfirmedStep::Continue(session) => session,
            _ => panic!("live process must reset the counter"),
        };
        for i in 1..=5 {
            session = match session.poll(Ok(vec![])) {
                ConfirmedStep::Continue(session) => session,
                ConfirmedStep::Ended(_) => {
                    assert_eq!(i, 5, "needs a fresh run of 5 after the reset");
                    return;
                }
            };
        }
        panic!("session never ended");
    }

    #[test]
    fn anti_cheat_survivor_counts_as_empty_but_extends_the_threshold() {
        // Scenario: pids {100, 101}, 101 is anti-cheat. 100 exits, 101
        // persists; the session must end at the extended threshold (15), not
        // the default (5).
        let session = LaunchSession::begin(direct_game(), Some(100), settings());
        let mut session = confirm(
            session,
            vec![
                proc(100, "hollow_knight", true),
                proc(101, "easyanticheat_eos", false),
            ],
        );

        for i in 1..=15 {
            session = match session.poll(Ok(vec![proc(101, "easyanticheat_eos", false)])) {
                ConfirmedStep::Continue(session) => {
                    assert!(i < 15, "anti-cheat-only should end at 15, not later");
                    session
                }
                ConfirmedStep::Ended(_) => {
                    assert_eq!(i, 15, "default threshold must not apply with anti-cheat");
                    return;
                }
            };
        }
        panic!("session never ended");
    }

    #[test]
    fn indirect_launch_discovers_processes_from_the_snapshot_diff() {
        let mut cfg = settings();
        cfg.discovery_grace_ms = 1000;
        cfg.discovery_settle_ms = 1000;
        let session = LaunchSession::begin(steam_game(), None, cfg);

        // Poll 1: baseline contains only storefront processes.
        let baseline = vec![proc(10, "steam", false), proc(11, "steamwebhelper", false)];
        let session = match session.poll(Ok(baseline.clone())) {
            StartingStep::Continue(session) => session,
            _ => panic!("baseline poll must continue"),
        };

        // Poll 2: a new process appeared; steam processes must be ignored,
        // the newcomer adopted and its window confirms the session.
        let mut with_game = baseline;
        with_game.push(proc(42, "portal2", true));
        with_game.push(proc(12, "steamservice", false));
        match session.poll(Ok(with_game)) {
            StartingStep::Confirmed(_) => {}
            _ => panic!("discovered window owner should confirm"),
        }
    }

    #[test]
    fn indirect_launch_with_no_match_hits_the_ceiling_unconfirmed() {
        // Scenario: nothing game-like ever shows up; the absolute ceiling of
        // 20 empty polls ends the session without a confirmation.
        let session = LaunchSession::begin(steam_game(), None, settings());
        let mut step = StartingStep::Continue(session);
        for i in 1..=20 {
            let session = match step {
                StartingStep::Continue(session) => session,
                _ => panic!("must stay in starting until the ceiling"),
            };
            step = session.poll(Ok(vec![proc(10, "steam", false)]));
            if let StartingStep::Ended(_) = &step {
                assert_eq!(i, 20);
                return;
            }
        }
        panic!("ceiling never reached");
    }

    #[test]
    fn repeated_query_failures_force_an_end() {
        let session = LaunchSession::begin(direct_game(), Some(100), settings());
        let mut session = confirm(session, vec![proc(100, "hollow_knight", true)]);

        for i in 1..=10 {
            session = match session.poll(Err(ProcessHostError::Query("access denied".into()))) {
                ConfirmedStep::Continue(session) => session,
                ConfirmedStep::Ended(_) => {
                    assert_eq!(i, 10);
                    return;
                }
            };
        }
        panic!("query failures never forced an end");
    }

    #[test]
    fn successful_query_resets_the_inconclusive_run() {
        let session = LaunchSession::begin(direct_game(), Some(100), settings());
        let mut session = confirm(session, vec![proc(100, "hollow_knight", true)]);

        for _ in 0..9 {
            session = match session.poll(Err(ProcessHostError::Query("flaky".into()))) {
                ConfirmedStep::Continue(session) => session,
                _ => panic!("ended below the failure threshold"),
            };
        }
        session = match session.poll(Ok(vec![proc(100, "hollow_knight", false)])) {
            ConfirmedStep::Continue(session) => session,
            _ => panic!("healthy poll must continue"),
        };
        // A fresh failure starts the run over instead of tripping at 10.
        match session.poll(Err(ProcessHostError::Query("flaky".into()))) {
            ConfirmedStep::Continue(_) => {}
            _ => panic!("inconclusive run should have reset"),
        }
    }

    #[test]
    fn late_spawned_helper_processes_are_adopted() {
        let session = LaunchSession::begin(direct_game(), Some(100), settings());
        let mut session = confirm(session, vec![proc(100, "hollow_knight", true)]);

        // A second matching process appears after confirmation and keeps the
        // session alive once the first one exits.
        session = match session.poll(Ok(vec![
            proc(100, "hollow_knight", true),
            proc(200, "hollow_knight_render", false),
        ])) {
            ConfirmedStep::Continue(session) => session,
            _ => panic!(),
        };
        for _ in 0..4 {
            session = match session.poll(Ok(vec![proc(200, "hollow_knight_render", false)])) {
                ConfirmedStep::Continue(session) => session,
                _ => panic!("helper process still alive, session must continue"),
            };
        }
    }

    struct ScriptedHost {
        tables: Mutex<VecDeque<Vec<ProcessDescriptor>>>,
    }

    impl ScriptedHost {
        fn new(tables: Vec<Vec<ProcessDescriptor>>) -> Self {
            Self {
                tables: Mutex::new(tables.into()),
            }
        }
    }

    impl ProcessHost for ScriptedHost {
        fn spawn(
            &self,
            _target: &LaunchTarget,
        ) -> Result<crate::launch::process_host::SpawnedProcess, ProcessHostError> {
            Ok(crate::launch::process_host::SpawnedProcess {
                initial_pid: Some(100),
            })
        }

        fn enumerate(&self) -> Result<Vec<ProcessDescriptor>, ProcessHostError> {
            let mut tables = self.tables.lock().unwrap();
            Ok(tables.pop_front().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn end_event_fires_exactly_once() {
        let mut cfg = settings();
        cfg.poll_interval_ms = 5;
        let host = Arc::new(ScriptedHost::new(vec![vec![proc(
            100,
            "hollow_knight",
            true,
        )]]));
        let (tx, mut rx) = mpsc::channel(4);

        let _handle = TrackerHandle::spawn(direct_game(), Some(100), host, cfg, tx);

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("tracker should end within the timeout")
            .expect("channel open");
        let TrackerEvent::Ended { game } = event;
        assert_eq!(game.name, "Hollow Knight");

        // No second event after the terminal transition.
        let extra = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err() || extra.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_suppresses_the_event() {
        let mut cfg = settings();
        cfg.poll_interval_ms = 5;
        let host = Arc::new(ScriptedHost::new(vec![
            vec![proc(100, "hollow_knight", true)];
            64
        ]));
        let (tx, mut rx) = mpsc::channel(4);

        let handle = TrackerHandle::spawn(direct_game(), Some(100), host, cfg, tx);
        handle.stop();
        handle.stop();

        let extra = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err() || extra.unwrap().is_none());
    }
}

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use couchdeck::catalog;
use couchdeck::config::Config;
use couchdeck::controller::dualshock::DualShockDriver;
use couchdeck::controller::hid;
use couchdeck::controller::hub::HubHandle;
use couchdeck::controller::switch_pro::SwitchProDriver;
use couchdeck::controller::xinput::XInputDriver;
use couchdeck::controller::ControllerDriver;
use couchdeck::input::intent::IntentKind;
use couchdeck::input::router::{RouterGate, RouterHandle};
use couchdeck::launch::coordinator::{CoordinatorEvent, CoordinatorHandle};
use couchdeck::launch::process_host::SystemProcessHost;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load();
    if let Err(e) = Config::ensure_default_config() {
        warn!("Could not persist default config: {}", e);
    }

    // Game catalog
    let steam_root = config.steam_root();
    let games = match catalog::scan_steam_library(&steam_root) {
        Ok(games) => games,
        Err(e) => {
            warn!("Steam scan failed: {}", e);
            Vec::new()
        }
    };
    for game in &games {
        info!("  {} -> {:?}", game.name, game.target);
    }

    // Controller stack: drivers -> hub -> router
    let mut drivers: Vec<Box<dyn ControllerDriver>> = Vec::new();
    match hid::init_hid_api() {
        Ok(api) => {
            drivers.push(Box::new(DualShockDriver::new(api.clone())));
            drivers.push(Box::new(SwitchProDriver::new(api)));
        }
        Err(e) => warn!("Raw HID unavailable, PlayStation/Switch pads disabled: {}", e),
    }
    match XInputDriver::new() {
        Ok(driver) => drivers.push(Box::new(driver)),
        Err(e) => warn!("XInput backend unavailable: {}", e),
    }

    let (hub_event_tx, mut hub_event_rx) = mpsc::channel(32);
    let hub = HubHandle::spawn(drivers, config.hub_settings(), hub_event_tx);

    let (gate_tx, gate_rx) = watch::channel(RouterGate::Active);
    let (intent_tx, mut intent_rx) = mpsc::channel(64);
    let router = RouterHandle::spawn(
        config.router_settings(),
        hub.subscribe(),
        gate_rx,
        intent_tx,
    );

    // Launch stack
    let host = match SystemProcessHost::new() {
        Ok(host) => Arc::new(host),
        Err(e) => {
            error!("Process host unavailable: {}", e);
            return Err(e.into());
        }
    };
    let (coordinator_event_tx, mut coordinator_event_rx) = mpsc::channel(8);
    let coordinator = CoordinatorHandle::spawn(
        host,
        config.tracker.clone(),
        gate_tx,
        hub.command_sender(),
        coordinator_event_tx,
    );

    info!("couchdeck up: {} games, waiting for input", games.len());

    // Console stand-in for the UI surface: a selection cursor over the
    // catalog, driven by navigation intents.
    let mut selected: usize = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            Some(event) = hub_event_rx.recv() => {
                info!("Controller event: {:?}", event);
            }
            Some(event) = coordinator_event_rx.recv() => {
                let CoordinatorEvent::GameEnded { game } = event;
                info!("Back to the menu, {} closed", game.name);
            }
            Some(intent) = intent_rx.recv() => match intent.kind {
                IntentKind::Move(delta) => {
                    if !games.is_empty() {
                        let len = games.len() as i32;
                        selected = ((selected as i32 + delta).rem_euclid(len)) as usize;
                        info!("Selected: {}", games[selected].name);
                    }
                }
                IntentKind::Activate => {
                    if let Some(game) = games.get(selected) {
                        match coordinator.launch(game.clone()).await {
                            Ok(handle) => info!("Now playing: {}", handle.game.name),
                            Err(e) => warn!("Launch rejected: {}", e),
                        }
                    }
                }
                IntentKind::Cancel => info!("Cancel"),
                IntentKind::ToggleSearch => info!("Toggle search"),
                IntentKind::OpenMenu => info!("Open menu"),
            },
        }
    }

    coordinator.stop();
    router.stop();
    hub.stop();
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

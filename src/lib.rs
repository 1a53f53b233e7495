//! Core of a gamepad-first desktop game launcher.
//!
//! Two subsystems do the real work: the controller stack (raw HID and XInput
//! drivers unified behind one snapshot model, arbitrated by a hub, translated
//! into discrete navigation intents by the router) and the launch stack
//! (process spawning, game-process lifetime tracking, launch coordination).
//! Rendering, settings screens and artwork handling live outside this crate
//! and consume the channels exposed here.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod input;
pub mod launch;

pub use catalog::{GameRef, LaunchTarget};
pub use config::Config;
pub use controller::hub::{HubEvent, HubHandle};
pub use input::intent::NavigationIntent;
pub use launch::coordinator::{CoordinatorEvent, CoordinatorHandle, LaunchError};

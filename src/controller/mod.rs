//! Controller subsystem for gamepad input handling
//!
//! Unifies heterogeneous pad hardware behind one snapshot model:
//!
//! 1. [`hid`] - Raw HID device access (non-blocking report reads)
//! 2. [`dualshock`] / [`switch_pro`] / [`xinput`] - Per-hardware drivers
//! 3. [`hub`] - Presence scanning, arbitration and snapshot publishing
//!
//! # Architecture
//!
//! ```text
//! DualShock ─┐
//! SwitchPro ─┼──► Hub (priority arbitration) ──► ControllerSnapshot stream
//! XInput    ─┘
//! ```
//!
//! Exactly one driver is authoritative at any instant; the hub re-probes
//! presence on a slow scan and publishes the active driver's snapshots at the
//! input tick rate.

pub mod driver;
pub mod dualshock;
pub mod hid;
pub mod hub;
pub mod switch_pro;
pub mod xinput;

pub use driver::{ButtonSet, ControllerDriver, ControllerKind, ControllerSnapshot, LogicalButton};
pub use hub::{ActiveControllerState, HubCommand, HubEvent, HubHandle, HubOutput, HubSettings};

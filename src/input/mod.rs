//! Snapshot-to-intent translation: debounce, edge detection and the
//! suspend/resume gate tied to game-running state.

pub mod intent;
pub mod router;

pub use intent::{IntentKind, NavigationIntent};
pub use router::{InputRouter, RouterGate, RouterHandle, RouterSettings};

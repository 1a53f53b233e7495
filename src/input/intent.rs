//! Discrete navigation events delivered to the UI surface.

use chrono::{DateTime, Local};

/// What the user asked the UI to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// Move the selection by the given delta (-1 left, +1 right).
    Move(i32),
    /// Activate the selected entry (launch the game under the cursor).
    Activate,
    /// Back out: close the search overlay if open, otherwise pop navigation.
    Cancel,
    ToggleSearch,
    OpenMenu,
}

/// One discrete, debounced input event. Produced and consumed in the same
/// tick; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationIntent {
    pub kind: IntentKind,
    pub timestamp: DateTime<Local>,
}

impl NavigationIntent {
    pub fn now(kind: IntentKind) -> Self {
        Self {
            kind,
            timestamp: Local::now(),
        }
    }
}

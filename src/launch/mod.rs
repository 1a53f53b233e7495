//! Game launching and process-lifetime tracking.
//!
//! `process_host` is the OS seam (spawn + process-table queries), `tracker`
//! answers "has the game session ended" exactly once per launch, and
//! `coordinator` sequences a launch end-to-end while holding the input
//! suspension invariant.

pub mod coordinator;
pub mod process_host;
pub mod tracker;

pub use coordinator::{CoordinatorEvent, CoordinatorHandle, LaunchError, LaunchHandle};
pub use process_host::{ProcessDescriptor, ProcessHost, ProcessHostError, SpawnedProcess};
pub use tracker::{TrackerEvent, TrackerHandle, TrackerSettings};

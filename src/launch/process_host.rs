//! OS process seam: spawning launch targets and querying the process table.
//!
//! Everything the tracker knows about the outside world comes through
//! [`ProcessHost`], so the heuristics stay testable against a scripted fake.
//! The real implementation is Windows-only (Toolhelp32 snapshot plus visible
//! top-level window enumeration); other platforms get a constructor error.

use std::process::Command;
use thiserror::Error;

use crate::catalog::LaunchTarget;

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub parent: u32,
    /// Lowercased image name without extension.
    pub name: String,
    /// Whether the process owns a visible top-level window.
    pub has_main_window: bool,
}

/// Result of spawning a launch target.
#[derive(Debug, Clone)]
pub struct SpawnedProcess {
    /// Pid of the direct child, when the child is (or may be) the game.
    /// `None` for protocol-handler launches where the child is just the
    /// shell hand-off.
    pub initial_pid: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ProcessHostError {
    #[error("failed to start process: {0}")]
    Spawn(String),

    #[error("process table query failed: {0}")]
    Query(String),

    #[error("process host is only available on Windows")]
    Unsupported,
}

pub trait ProcessHost: Send + Sync + 'static {
    /// Start a launch target. Protocol URIs go through the shell; the
    /// resulting pid is not the game and is reported as `None`.
    fn spawn(&self, target: &LaunchTarget) -> Result<SpawnedProcess, ProcessHostError>;

    /// Snapshot the full process table.
    fn enumerate(&self) -> Result<Vec<ProcessDescriptor>, ProcessHostError>;

    fn is_alive(&self, pid: u32) -> Result<bool, ProcessHostError> {
        Ok(self.enumerate()?.iter().any(|p| p.pid == pid))
    }

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessHostError> {
        Ok(self
            .enumerate()?
            .iter()
            .filter(|p| p.parent == pid)
            .map(|p| p.pid)
            .collect())
    }
}

/// Spawn helper shared by platform implementations.
fn spawn_target(target: &LaunchTarget) -> Result<SpawnedProcess, ProcessHostError> {
    match target {
        LaunchTarget::Executable(path) => {
            let mut command = Command::new(path);
            if let Some(dir) = path.parent() {
                command.current_dir(dir);
            }
            let child = command
                .spawn()
                .map_err(|e| ProcessHostError::Spawn(e.to_string()))?;
            Ok(SpawnedProcess {
                initial_pid: Some(child.id()),
            })
        }
        LaunchTarget::Uri(uri) => {
            // `start` resolves the protocol handler; the cmd child exits
            // immediately and is useless for tracking.
            Command::new("cmd")
                .args(["/C", "start", "", uri])
                .spawn()
                .map_err(|e| ProcessHostError::Spawn(e.to_string()))?;
            Ok(SpawnedProcess { initial_pid: None })
        }
    }
}

#[cfg(windows)]
pub use windows_host::SystemProcessHost;

#[cfg(windows)]
mod windows_host {
    use super::*;
    use std::collections::HashSet;
    use windows::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowThreadProcessId, IsWindowVisible,
    };

    pub struct SystemProcessHost;

    impl SystemProcessHost {
        pub fn new() -> Result<Self, ProcessHostError> {
            Ok(SystemProcessHost)
        }
    }

    unsafe extern "system" fn collect_window_pids(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let pids = &mut *(lparam.0 as *mut HashSet<u32>);
        if IsWindowVisible(hwnd).as_bool() {
            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, Some(&mut pid));
            if pid != 0 {
                pids.insert(pid);
            }
        }
        BOOL(1)
    }

    /// Pids owning at least one visible top-level window.
    fn window_owner_pids() -> HashSet<u32> {
        let mut pids = HashSet::new();
        unsafe {
            let _ = EnumWindows(
                Some(collect_window_pids),
                LPARAM(&mut pids as *mut HashSet<u32> as isize),
            );
        }
        pids
    }

    fn image_stem(raw: &[u16]) -> String {
        let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
        let name = String::from_utf16_lossy(&raw[..len]).to_lowercase();
        name.strip_suffix(".exe").map(str::to_string).unwrap_or(name)
    }

    impl ProcessHost for SystemProcessHost {
        fn spawn(&self, target: &LaunchTarget) -> Result<SpawnedProcess, ProcessHostError> {
            spawn_target(target)
        }

        fn enumerate(&self) -> Result<Vec<ProcessDescriptor>, ProcessHostError> {
            let window_owners = window_owner_pids();
            let mut processes = Vec::new();
            unsafe {
                let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                    .map_err(|e| ProcessHostError::Query(e.to_string()))?;

                let mut entry = PROCESSENTRY32W {
                    dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                    ..Default::default()
                };
                if Process32FirstW(snapshot, &mut entry).is_ok() {
                    loop {
                        processes.push(ProcessDescriptor {
                            pid: entry.th32ProcessID,
                            parent: entry.th32ParentProcessID,
                            name: image_stem(&entry.szExeFile),
                            has_main_window: window_owners.contains(&entry.th32ProcessID),
                        });
                        if Process32NextW(snapshot, &mut entry).is_err() {
                            break;
                        }
                    }
                }
                let _ = CloseHandle(snapshot);
            }
            Ok(processes)
        }
    }
}

#[cfg(not(windows))]
pub struct SystemProcessHost;

#[cfg(not(windows))]
impl SystemProcessHost {
    pub fn new() -> Result<Self, ProcessHostError> {
        Err(ProcessHostError::Unsupported)
    }
}

#[cfg(not(windows))]
impl ProcessHost for SystemProcessHost {
    fn spawn(&self, target: &LaunchTarget) -> Result<SpawnedProcess, ProcessHostError> {
        spawn_target(target)
    }

    fn enumerate(&self) -> Result<Vec<ProcessDescriptor>, ProcessHostError> {
        Err(ProcessHostError::Unsupported)
    }
}

use std::ffi::OsString;
use std::io;

use thiserror::Error;

use crate::mask::AffinityMask;

/// One row of the system process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Image file name as recorded by the OS (e.g. `Gears5_EAC.exe`).
    pub exe_name: String,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("could not snapshot the process table: {0}")]
    Snapshot(String),
    #[error("could not open process {pid}: {reason}")]
    Open { pid: u32, reason: String },
    #[error("{call} failed on process {pid}: {reason}")]
    Call {
        pid: u32,
        call: &'static str,
        reason: String,
    },
    #[cfg(not(windows))]
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// Abstraction over the OS process table and scheduling controls.
/// Everything above this layer is platform neutral and testable against a mock.
pub trait ProcessController: Send + Sync {
    /// Take a fresh snapshot of every running process.
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, ProcessError>;

    /// Open a process with just enough rights to query and change its scheduling.
    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, ProcessError>;

    /// Start `argv[0]` with the remaining arguments, detached from our console.
    /// Returns the child's process id.
    fn spawn_detached(&self, argv: &[OsString]) -> io::Result<u32>;
}

/// An open process. Dropping the handle releases it.
pub trait ProcessHandle {
    fn pid(&self) -> u32;
    fn set_affinity(&mut self, mask: AffinityMask) -> Result<(), ProcessError>;
    fn set_high_priority(&mut self) -> Result<(), ProcessError>;
}

/// Image names compare case-insensitively and exactly (no substring matches).
/// `wanted_lower` must already be lowercase.
pub fn exe_name_matches(recorded: &str, wanted_lower: &str) -> bool {
    recorded == wanted_lower || recorded.to_lowercase() == wanted_lower
}

fn spawn_command(argv: &[OsString]) -> io::Result<std::process::Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"))?;
    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    Ok(cmd)
}

/// The production controller on Windows: Toolhelp32 + kernel32 scheduling calls.
#[cfg(windows)]
pub struct WindowsProcesses;

#[cfg(windows)]
mod win {
    use super::*;
    use std::os::windows::process::CommandExt;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };
    use windows::Win32::System::Threading::{
        CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS, HIGH_PRIORITY_CLASS, OpenProcess,
        PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_INFORMATION, SetPriorityClass,
        SetProcessAffinityMask,
    };

    /// Closes the wrapped handle on drop.
    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    fn exe_file_name(entry: &PROCESSENTRY32W) -> String {
        let len = entry
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExeFile.len());
        String::from_utf16_lossy(&entry.szExeFile[..len])
    }

    impl ProcessController for WindowsProcesses {
        fn snapshot(&self) -> Result<Vec<ProcessEntry>, ProcessError> {
            let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
                .map_err(|e| ProcessError::Snapshot(e.to_string()))?;
            let snapshot = OwnedHandle(snapshot);

            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };
            let mut entries = Vec::new();

            // Process32FirstW fails on an empty table; treat that as "nothing running".
            if unsafe { Process32FirstW(snapshot.0, &mut entry) }.is_err() {
                return Ok(entries);
            }
            loop {
                entries.push(ProcessEntry {
                    pid: entry.th32ProcessID,
                    exe_name: exe_file_name(&entry),
                });
                if unsafe { Process32NextW(snapshot.0, &mut entry) }.is_err() {
                    break;
                }
            }
            Ok(entries)
        }

        fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, ProcessError> {
            let access = PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SET_INFORMATION;
            let handle = unsafe { OpenProcess(access, false, pid) }.map_err(|e| {
                ProcessError::Open {
                    pid,
                    reason: e.to_string(),
                }
            })?;
            Ok(Box::new(WindowsProcess {
                pid,
                handle: OwnedHandle(handle),
            }))
        }

        fn spawn_detached(&self, argv: &[OsString]) -> io::Result<u32> {
            let mut cmd = spawn_command(argv)?;
            cmd.creation_flags(DETACHED_PROCESS.0 | CREATE_NEW_PROCESS_GROUP.0);
            Ok(cmd.spawn()?.id())
        }
    }

    struct WindowsProcess {
        pid: u32,
        handle: OwnedHandle,
    }

    impl ProcessHandle for WindowsProcess {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn set_affinity(&mut self, mask: AffinityMask) -> Result<(), ProcessError> {
            unsafe { SetProcessAffinityMask(self.handle.0, mask.bits() as usize) }.map_err(|e| {
                ProcessError::Call {
                    pid: self.pid,
                    call: "SetProcessAffinityMask",
                    reason: e.to_string(),
                }
            })
        }

        fn set_high_priority(&mut self) -> Result<(), ProcessError> {
            unsafe { SetPriorityClass(self.handle.0, HIGH_PRIORITY_CLASS) }.map_err(|e| {
                ProcessError::Call {
                    pid: self.pid,
                    call: "SetPriorityClass",
                    reason: e.to_string(),
                }
            })
        }
    }
}

/// Fallback controller for platforms without per-process affinity control.
/// Enumeration works through `sysinfo`; scheduling changes report `Unsupported`.
#[cfg(not(windows))]
pub struct PortableProcesses;

#[cfg(not(windows))]
mod portable {
    use super::*;
    use std::ffi::OsStr;
    use std::path::Path;
    use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

    /// Linux truncates `name()` to 15 bytes, so prefer the executable's file name.
    fn image_name(exe: Option<&Path>, name: &OsStr) -> String {
        exe.and_then(Path::file_name)
            .unwrap_or(name)
            .to_string_lossy()
            .into_owned()
    }

    impl ProcessController for PortableProcesses {
        fn snapshot(&self) -> Result<Vec<ProcessEntry>, ProcessError> {
            let mut sys = System::new();
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
            );
            Ok(sys
                .processes()
                .values()
                .map(|p| ProcessEntry {
                    pid: p.pid().as_u32(),
                    exe_name: image_name(p.exe(), p.name()),
                })
                .collect())
        }

        fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, ProcessError> {
            Ok(Box::new(PortableProcess { pid }))
        }

        fn spawn_detached(&self, argv: &[OsString]) -> io::Result<u32> {
            Ok(spawn_command(argv)?.spawn()?.id())
        }
    }

    struct PortableProcess {
        pid: u32,
    }

    impl ProcessHandle for PortableProcess {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn set_affinity(&mut self, _mask: AffinityMask) -> Result<(), ProcessError> {
            Err(ProcessError::Unsupported("CPU affinity"))
        }

        fn set_high_priority(&mut self) -> Result<(), ProcessError> {
            Err(ProcessError::Unsupported("priority classes"))
        }
    }

}

/// The controller for the platform we were built for.
#[cfg(windows)]
pub fn native() -> WindowsProcesses {
    WindowsProcesses
}

#[cfg(not(windows))]
pub fn native() -> PortableProcesses {
    PortableProcesses
}

// Process lookup via a Toolhelp snapshot

use std::io;
use std::mem;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
};

/// One running process, as seen in the snapshot.
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// RAII guard for the snapshot handle.
struct SnapshotGuard(HANDLE);

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Snapshot every running process.
pub fn snapshot() -> io::Result<Vec<ProcessEntry>> {
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
            .map_err(|_| io::Error::last_os_error())?;
        let _guard = SnapshotGuard(snapshot);

        let mut entry: PROCESSENTRY32W = mem::zeroed();
        entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

        if Process32FirstW(snapshot, &mut entry).is_err() {
            return Err(io::Error::last_os_error());
        }

        let mut processes = Vec::new();
        loop {
            let len = entry
                .szExeFile
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(entry.szExeFile.len());
            processes.push(ProcessEntry {
                pid: entry.th32ProcessID,
                name: String::from_utf16_lossy(&entry.szExeFile[..len]),
            });

            entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;
            if Process32NextW(snapshot, &mut entry).is_err() {
                break;
            }
        }

        Ok(processes)
    }
}

/// All processes whose name contains `name`, case-insensitively.
pub fn find_by_name(name: &str) -> io::Result<Vec<ProcessEntry>> {
    let lowered = name.to_lowercase();
    Ok(snapshot()?
        .into_iter()
        .filter(|p| p.name.to_lowercase().contains(&lowered))
        .collect())
}

/// Whether a process with this PID is currently running.
pub fn pid_exists(pid: u32) -> io::Result<bool> {
    Ok(snapshot()?.iter().any(|p| p.pid == pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_contains_current_process() {
        let processes = snapshot().expect("snapshot should succeed");
        let pid = std::process::id();
        assert!(processes.iter().any(|p| p.pid == pid));
    }

    #[test]
    fn current_pid_exists() {
        assert!(pid_exists(std::process::id()).unwrap());
    }
}

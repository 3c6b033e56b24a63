//! Win32 backend: real process attachment, DbgHelp symbol resolution,
//! Toolhelp module snapshots, and remote thread execution.

use std::ffi::c_void;
use std::mem;
use std::path::PathBuf;
use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Diagnostics::Debug::{
    SymCleanup, SymFromNameW, SymInitializeW, SymLoadModuleExW, WriteProcessMemory, SYMBOL_INFOW,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, OpenProcess, WaitForSingleObject, PROCESS_CREATE_THREAD,
    PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
};

use crate::backend::{Backend, ModuleRecord};
use crate::error::{InjectResult, InjectorError};

/// Backend implementation over the Win32 API.
#[derive(Debug, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }
}

/// An open process handle plus the PID it was opened for.
///
/// The PID is kept because Toolhelp snapshots are keyed by PID, not handle.
pub struct ProcessAttachment {
    handle: HANDLE,
    pid: u32,
}

// Process handles can be safely moved between threads
unsafe impl Send for ProcessAttachment {}

impl ProcessAttachment {
    /// Raw handle, valid while the attachment is alive.
    pub fn as_handle(&self) -> HANDLE {
        self.handle
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// A started remote thread, pending its bounded join.
pub struct RemoteThread {
    handle: HANDLE,
}

unsafe impl Send for RemoteThread {}

/// RAII guard for Toolhelp snapshot handles.
struct SnapshotGuard(HANDLE);

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn to_wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

impl Backend for WindowsBackend {
    type Process = ProcessAttachment;
    type Thread = RemoteThread;

    fn attach(&self, pid: u32) -> InjectResult<ProcessAttachment> {
        let rights = PROCESS_CREATE_THREAD
            | PROCESS_QUERY_INFORMATION
            | PROCESS_VM_OPERATION
            | PROCESS_VM_WRITE
            | PROCESS_VM_READ;

        unsafe {
            match OpenProcess(rights, false, pid) {
                Ok(handle) if handle.is_invalid() => Err(InjectorError::OpenProcessFailed(
                    pid,
                    std::io::Error::last_os_error(),
                )),
                Ok(handle) => {
                    log::debug!("attached to process {} (handle {:?})", pid, handle);
                    Ok(ProcessAttachment { handle, pid })
                }
                Err(_) => Err(InjectorError::OpenProcessFailed(
                    pid,
                    std::io::Error::last_os_error(),
                )),
            }
        }
    }

    fn detach(&self, process: &ProcessAttachment) {
        unsafe {
            let _ = CloseHandle(process.handle);
        }
        log::debug!("detached from process {}", process.pid);
    }

    fn init_symbols(&self, process: &ProcessAttachment) -> InjectResult<()> {
        // No search path, no invasion: modules are registered one by one.
        unsafe {
            SymInitializeW(process.handle, PCWSTR::null(), false)
                .map_err(|_| InjectorError::SymbolInitFailed(std::io::Error::last_os_error()))
        }
    }

    fn teardown_symbols(&self, process: &ProcessAttachment) {
        unsafe {
            if let Err(e) = SymCleanup(process.handle) {
                log::warn!("symbol handler cleanup failed: {}", e);
            }
        }
    }

    fn module_snapshot(&self, process: &ProcessAttachment) -> InjectResult<Vec<ModuleRecord>> {
        unsafe {
            let snapshot =
                CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, process.pid)
                    .map_err(|_| {
                        InjectorError::ModuleSnapshotFailed(std::io::Error::last_os_error())
                    })?;
            let _guard = SnapshotGuard(snapshot);

            let mut modules = Vec::new();
            let mut entry: MODULEENTRY32W = mem::zeroed();
            entry.dwSize = mem::size_of::<MODULEENTRY32W>() as u32;

            if Module32FirstW(snapshot, &mut entry).is_err() {
                return Err(InjectorError::ModuleSnapshotFailed(
                    std::io::Error::last_os_error(),
                ));
            }

            loop {
                modules.push(ModuleRecord {
                    name: wide_to_string(&entry.szModule),
                    path: PathBuf::from(wide_to_string(&entry.szExePath)),
                    base: entry.modBaseAddr as u64,
                    size: entry.modBaseSize,
                });

                entry.dwSize = mem::size_of::<MODULEENTRY32W>() as u32;
                if Module32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }

            Ok(modules)
        }
    }

    fn register_module(
        &self,
        process: &ProcessAttachment,
        module: &ModuleRecord,
    ) -> InjectResult<u64> {
        let image = to_wide(&module.path.to_string_lossy());
        let name = to_wide(&module.name);

        let base = unsafe {
            SymLoadModuleExW(
                process.handle,
                None,
                PCWSTR(image.as_ptr()),
                PCWSTR(name.as_ptr()),
                module.base,
                module.size,
                None,
                0,
            )
        };

        if base == 0 {
            return Err(InjectorError::ModuleRegisterFailed(
                module.name.clone(),
                std::io::Error::last_os_error(),
            ));
        }

        log::debug!("registered module {} at 0x{:X}", module.name, base);
        Ok(base)
    }

    fn resolve_symbol(&self, process: &ProcessAttachment, name: &str) -> InjectResult<u64> {
        let wide_name = to_wide(name);
        let mut symbol = SYMBOL_INFOW::default();
        symbol.SizeOfStruct = mem::size_of::<SYMBOL_INFOW>() as u32;

        unsafe {
            SymFromNameW(process.handle, PCWSTR(wide_name.as_ptr()), &mut symbol)
                .map_err(|_| InjectorError::SymbolNotFound(name.to_string()))?;
        }

        if symbol.Address == 0 {
            return Err(InjectorError::SymbolNotFound(name.to_string()));
        }

        log::debug!("resolved {} to 0x{:X}", name, symbol.Address);
        Ok(symbol.Address)
    }

    fn allocate(&self, process: &ProcessAttachment, size: usize) -> InjectResult<u64> {
        let address = unsafe {
            VirtualAllocEx(
                process.handle,
                None,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };

        if address.is_null() {
            return Err(InjectorError::AllocationFailed(
                std::io::Error::last_os_error(),
            ));
        }

        log::debug!("allocated {} bytes at {:?} in target", size, address);
        Ok(address as u64)
    }

    fn release(&self, process: &ProcessAttachment, address: u64) {
        unsafe {
            if let Err(e) =
                VirtualFreeEx(process.handle, address as *mut c_void, 0, MEM_RELEASE)
            {
                log::warn!("failed to free remote memory at 0x{:X}: {}", address, e);
            }
        }
    }

    fn write_bytes(
        &self,
        process: &ProcessAttachment,
        address: u64,
        bytes: &[u8],
    ) -> InjectResult<()> {
        let mut written = 0;

        unsafe {
            WriteProcessMemory(
                process.handle,
                address as *const c_void,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                Some(&mut written),
            )
            .map_err(|_| InjectorError::WriteFailed(std::io::Error::last_os_error()))?;
        }

        if written != bytes.len() {
            return Err(InjectorError::WriteFailed(std::io::Error::other(
                "incomplete write operation",
            )));
        }

        Ok(())
    }

    fn start_thread(
        &self,
        process: &ProcessAttachment,
        entry: u64,
        parameter: u64,
    ) -> InjectResult<RemoteThread> {
        let handle = unsafe {
            CreateRemoteThread(
                process.handle,
                None,
                0,
                Some(mem::transmute::<
                    usize,
                    unsafe extern "system" fn(*mut c_void) -> u32,
                >(entry as usize)),
                Some(parameter as *const c_void),
                0,
                None,
            )
            .map_err(|_| InjectorError::ThreadCreateFailed(std::io::Error::last_os_error()))?
        };

        log::debug!("remote thread started at 0x{:X}", entry);
        Ok(RemoteThread { handle })
    }

    fn wait_thread(&self, thread: RemoteThread, timeout: Duration) -> InjectResult<()> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let result = unsafe { WaitForSingleObject(thread.handle, millis) };

        unsafe {
            let _ = CloseHandle(thread.handle);
        }

        match result {
            WAIT_OBJECT_0 => Ok(()),
            WAIT_TIMEOUT => Err(InjectorError::WaitTimeout(timeout)),
            _ => Err(InjectorError::WaitFailed(std::io::Error::last_os_error())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_to_current_process() {
        let backend = WindowsBackend::new();
        let pid = std::process::id();

        let process = backend.attach(pid).expect("should open current process");
        assert_eq!(process.pid(), pid);
        backend.detach(&process);
    }

    #[test]
    fn attach_to_invalid_pid() {
        let backend = WindowsBackend::new();

        // PID 0 is never a valid user process
        let result = backend.attach(0);
        assert!(matches!(result, Err(InjectorError::OpenProcessFailed(0, _))));
    }

    #[test]
    fn snapshot_contains_kernel32() {
        let backend = WindowsBackend::new();
        let process = backend
            .attach(std::process::id())
            .expect("should open current process");

        let modules = backend.module_snapshot(&process).expect("snapshot failed");
        assert!(modules
            .iter()
            .any(|m| m.name.eq_ignore_ascii_case("kernel32.dll")));

        backend.detach(&process);
    }
}

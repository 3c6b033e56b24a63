//! Minimal agent library for injection testing.
//!
//! Reports attach/detach on the debugger output and exposes `probe_notify`,
//! an export matching the remote-thread entry signature, which echoes a
//! NUL-terminated payload staged by the injector.

#![cfg(windows)]

use std::ffi::c_void;

use windows::core::{w, PCSTR};
use windows::Win32::Foundation::{BOOL, HINSTANCE};
use windows::Win32::System::Diagnostics::Debug::{OutputDebugStringA, OutputDebugStringW};
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(
    _dll_module: HINSTANCE,
    call_reason: u32,
    _reserved: *mut c_void,
) -> BOOL {
    unsafe {
        match call_reason {
            DLL_PROCESS_ATTACH => OutputDebugStringW(w!("probe-dll: attached")),
            DLL_PROCESS_DETACH => OutputDebugStringW(w!("probe-dll: detached")),
            _ => {}
        }
    }

    BOOL::from(true)
}

/// Notify export. The injector passes the address of its argument buffer;
/// the payload is expected to be a NUL-terminated byte string.
#[no_mangle]
pub extern "system" fn probe_notify(argument: *mut c_void) -> u32 {
    if !argument.is_null() {
        unsafe {
            OutputDebugStringW(w!("probe-dll: notify"));
            OutputDebugStringA(PCSTR(argument as *const u8));
        }
    }

    0
}

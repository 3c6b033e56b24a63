// Token privilege handling for opening processes owned by other users

use crate::error::PrivilegeError;
use windows::core::w;
use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, LUID, WIN32_ERROR};
use windows::Win32::Security::{
    AdjustTokenPrivileges, CheckTokenMembership, CreateWellKnownSid, LookupPrivilegeValueW,
    WinBuiltinAdministratorsSid, LUID_AND_ATTRIBUTES, PSID, SE_PRIVILEGE_ENABLED,
    TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

const ERROR_NOT_ALL_ASSIGNED: WIN32_ERROR = WIN32_ERROR(1300);

/// Privilege operations for the current process.
pub struct PrivilegeManager;

impl PrivilegeManager {
    /// Whether the process token belongs to the Administrators group.
    pub fn is_administrator() -> Result<bool, PrivilegeError> {
        unsafe {
            let mut sid_size = 0u32;
            let _ = CreateWellKnownSid(
                WinBuiltinAdministratorsSid,
                None,
                PSID(std::ptr::null_mut()),
                &mut sid_size,
            );

            let mut sid = vec![0u8; sid_size as usize];
            CreateWellKnownSid(
                WinBuiltinAdministratorsSid,
                None,
                PSID(sid.as_mut_ptr() as *mut _),
                &mut sid_size,
            )
            .map_err(|_| PrivilegeError::SidCreationFailed(std::io::Error::last_os_error()))?;

            let mut is_member = Default::default();
            CheckTokenMembership(None, PSID(sid.as_ptr() as *mut _), &mut is_member)
                .map_err(|_| {
                    PrivilegeError::MembershipCheckFailed(std::io::Error::last_os_error())
                })?;

            Ok(is_member.as_bool())
        }
    }

    /// Enable `SeDebugPrivilege`, required to attach to processes owned by
    /// other users or to protected ones. Needs an administrator token.
    pub fn enable_debug_privilege() -> Result<(), PrivilegeError> {
        if !Self::is_administrator()? {
            return Err(PrivilegeError::NotAdministrator);
        }

        unsafe {
            let mut token = HANDLE::default();
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                &mut token,
            )
            .map_err(|_| PrivilegeError::OpenTokenFailed(std::io::Error::last_os_error()))?;
            let _guard = TokenGuard(token);

            let mut luid = LUID::default();
            LookupPrivilegeValueW(None, w!("SeDebugPrivilege"), &mut luid).map_err(|_| {
                PrivilegeError::LookupPrivilegeFailed(std::io::Error::last_os_error())
            })?;

            let mut privileges = TOKEN_PRIVILEGES {
                PrivilegeCount: 1,
                Privileges: [LUID_AND_ATTRIBUTES {
                    Luid: luid,
                    Attributes: SE_PRIVILEGE_ENABLED,
                }],
            };

            AdjustTokenPrivileges(token, false, Some(&mut privileges), 0, None, None).map_err(
                |_| PrivilegeError::AdjustPrivilegeFailed(std::io::Error::last_os_error()),
            )?;

            // AdjustTokenPrivileges succeeds even when nothing was granted.
            let last_error = GetLastError();
            if last_error == ERROR_NOT_ALL_ASSIGNED {
                return Err(PrivilegeError::PrivilegeNotHeld(
                    "SeDebugPrivilege".to_string(),
                ));
            }
            if last_error.0 != 0 {
                return Err(PrivilegeError::AdjustPrivilegeFailed(
                    std::io::Error::from_raw_os_error(last_error.0 as i32),
                ));
            }

            log::info!("SeDebugPrivilege enabled");
            Ok(())
        }
    }

    /// Like [`PrivilegeManager::enable_debug_privilege`] but logs instead
    /// of failing; injection into own-user processes works without it.
    pub fn try_enable_debug_privilege() -> bool {
        match Self::enable_debug_privilege() {
            Ok(()) => true,
            Err(error) => {
                log::warn!("could not enable SeDebugPrivilege: {}", error);
                false
            }
        }
    }
}

/// RAII guard for the process token handle.
struct TokenGuard(HANDLE);

impl Drop for TokenGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.0.is_invalid() {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

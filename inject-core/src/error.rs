// Error types for injector operations

use std::time::Duration;
use thiserror::Error;

/// Result type for injector operations.
pub type InjectResult<T> = Result<T, InjectorError>;

/// Errors surfaced by the injector lifecycle, module/symbol resolution and
/// remote invocation.
#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("injector is already attached to a process")]
    AlreadyAttached,

    #[error("injector is not attached to a process")]
    NotAttached,

    #[error("no library is injected into the target")]
    NotInjected,

    #[error("notify export name was never configured")]
    NotifyUnconfigured,

    #[error("failed to open target process {0}")]
    OpenProcessFailed(u32, #[source] std::io::Error),

    #[error("failed to initialize symbol handler for target")]
    SymbolInitFailed(#[source] std::io::Error),

    #[error("failed to snapshot modules of the target process")]
    ModuleSnapshotFailed(#[source] std::io::Error),

    #[error("module not found in target: {0}")]
    ModuleNotFound(String),

    #[error("failed to register module '{0}' with the symbol handler")]
    ModuleRegisterFailed(String, #[source] std::io::Error),

    #[error("failed to allocate argument buffer in target")]
    AllocationFailed(#[source] std::io::Error),

    #[error("failed to write payload into target memory")]
    WriteFailed(#[source] std::io::Error),

    #[error("payload of {size} bytes exceeds argument buffer capacity of {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("failed to resolve library path")]
    PathResolveFailed(#[source] std::io::Error),

    #[error("resolved path of {len} characters exceeds the {max} character limit")]
    PathTooLong { len: usize, max: usize },

    #[error("symbol not found in target: {0}")]
    SymbolNotFound(String),

    #[error("failed to create remote thread")]
    ThreadCreateFailed(#[source] std::io::Error),

    #[error("remote call did not complete within {0:?}")]
    WaitTimeout(Duration),

    #[error("failed waiting on remote thread")]
    WaitFailed(#[source] std::io::Error),
}

/// Errors that can occur while adjusting token privileges.
#[cfg(windows)]
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("Failed to open process token")]
    OpenTokenFailed(#[source] std::io::Error),

    #[error("Failed to lookup privilege value")]
    LookupPrivilegeFailed(#[source] std::io::Error),

    #[error("Failed to adjust token privileges")]
    AdjustPrivilegeFailed(#[source] std::io::Error),

    #[error("Failed to create well-known SID")]
    SidCreationFailed(#[source] std::io::Error),

    #[error("Failed to check token membership")]
    MembershipCheckFailed(#[source] std::io::Error),

    #[error("Privilege not held: {0}")]
    PrivilegeNotHeld(String),

    #[error("Not running as administrator")]
    NotAdministrator,
}

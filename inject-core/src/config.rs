//! Injector tunables.

use std::time::Duration;

/// Default capacity of the remote argument buffer, in bytes.
pub const ARGUMENT_BUFFER_CAPACITY: usize = 4096;

/// Default bound on how long a remote call is waited for.
pub const REMOTE_CALL_WAIT: Duration = Duration::from_secs(5);

/// Default limit on the resolved library path length, in characters.
pub const MAX_PATH_CHARS: usize = 512;

/// Tunables for one injector instance, fixed at construction.
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    /// Capacity of the argument buffer allocated inside the target.
    /// Every staged payload must fit into this region.
    pub buffer_capacity: usize,

    /// How long a remote call is waited for before it is reported as
    /// failed. The remote thread is not terminated on timeout.
    pub invoke_wait: Duration,

    /// Upper bound on the resolved library path length.
    pub max_path_len: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: ARGUMENT_BUFFER_CAPACITY,
            invoke_wait: REMOTE_CALL_WAIT,
            max_path_len: MAX_PATH_CHARS,
        }
    }
}

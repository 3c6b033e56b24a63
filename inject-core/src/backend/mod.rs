//! OS capability surface used by the injector.
//!
//! Everything the injector needs from the operating system goes through one
//! trait: process attachment, the symbol-resolution context, module
//! snapshots, remote memory, and remote thread execution. The core logic is
//! written against the trait so it can be exercised with [`fake::FakeBackend`]
//! on any host; [`windows::WindowsBackend`] is the real implementation.

pub mod fake;
#[cfg(windows)]
pub mod windows;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::InjectResult;

/// One module mapped into the target process, as seen in a snapshot.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// File name of the module, e.g. `kernel32.dll`.
    pub name: String,
    /// Full on-disk path of the module image.
    pub path: PathBuf,
    /// Base address inside the target.
    pub base: u64,
    /// Size of the mapped image in bytes.
    pub size: u32,
}

/// The five OS facilities the injector coordinates.
///
/// Handle-like values are the associated `Process` and `Thread` types;
/// ownership rules mirror the real APIs: `detach` closes what `attach`
/// opened, and `wait_thread` consumes the thread and releases its handle
/// whether or not the wait succeeded.
pub trait Backend {
    /// Exclusive attachment to one target process.
    type Process;
    /// A started remote execution unit, pending its bounded join.
    type Thread;

    /// Open the target with the access rights the injector needs
    /// (create-thread, query, VM read/write/operate).
    fn attach(&self, pid: u32) -> InjectResult<Self::Process>;

    /// Close the attachment. Best-effort; never fails teardown.
    fn detach(&self, process: &Self::Process);

    /// Initialize the symbol-resolution context scoped to this attachment.
    fn init_symbols(&self, process: &Self::Process) -> InjectResult<()>;

    /// Discard the symbol-resolution context. Best-effort.
    fn teardown_symbols(&self, process: &Self::Process);

    /// Point-in-time snapshot of the modules mapped into the target.
    /// Modules loaded after the snapshot is taken are not visible.
    fn module_snapshot(&self, process: &Self::Process) -> InjectResult<Vec<ModuleRecord>>;

    /// Register a module with the symbol context so its exports become
    /// resolvable by name. Returns the module's base address.
    fn register_module(&self, process: &Self::Process, module: &ModuleRecord) -> InjectResult<u64>;

    /// Resolve an exported symbol of a registered module to an address in
    /// the target's address space.
    fn resolve_symbol(&self, process: &Self::Process, name: &str) -> InjectResult<u64>;

    /// Allocate a readable/writable region of `size` bytes in the target.
    fn allocate(&self, process: &Self::Process, size: usize) -> InjectResult<u64>;

    /// Release a region previously returned by [`Backend::allocate`].
    /// Best-effort; never fails teardown.
    fn release(&self, process: &Self::Process, address: u64);

    /// Copy `bytes` into the target at `address`.
    fn write_bytes(&self, process: &Self::Process, address: u64, bytes: &[u8]) -> InjectResult<()>;

    /// Start a remote thread at `entry` with a single pointer-sized
    /// `parameter`.
    fn start_thread(
        &self,
        process: &Self::Process,
        entry: u64,
        parameter: u64,
    ) -> InjectResult<Self::Thread>;

    /// Block until the thread finishes or `timeout` elapses. The thread
    /// handle is released either way; on timeout the remote thread keeps
    /// running detached.
    fn wait_thread(&self, thread: Self::Thread, timeout: Duration) -> InjectResult<()>;
}

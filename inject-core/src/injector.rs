//! Injector lifecycle and remote invocation.
//!
//! One `Injector` owns one target attachment and walks it through
//! detached → attached → symbols ready → buffer ready → injected. Any
//! failure along the way unwinds back to detached; nothing partially
//! acquired survives a failed `load`.

use std::path::{Path, PathBuf};

use crate::backend::Backend;
#[cfg(windows)]
use crate::backend::windows::WindowsBackend;
use crate::config::InjectorConfig;
use crate::error::{InjectResult, InjectorError};
use crate::symbols::{self, FunctionRole, FunctionTable, SYSTEM_MODULE};

/// The argument region allocated inside the target, reused by every remote
/// call that passes a non-scalar argument.
#[derive(Debug, Clone, Copy)]
struct RemoteBuffer {
    address: u64,
    capacity: usize,
}

/// Argument of a remote call: either a pointer-sized scalar passed through
/// directly, or a payload staged into the argument buffer.
enum RemoteArg<'a> {
    Value(u64),
    Payload(&'a [u8]),
}

/// Injects a shared library into a running process and calls its exports.
///
/// Exactly one target process per instance. Dropping an attached instance
/// unloads it.
pub struct Injector<B: Backend> {
    backend: B,
    config: InjectorConfig,
    process: Option<B::Process>,
    symbols_ready: bool,
    buffer: Option<RemoteBuffer>,
    injected_base: u64,
    functions: FunctionTable,
}

#[cfg(windows)]
impl Injector<WindowsBackend> {
    /// Injector over the live Win32 API with default tunables.
    pub fn new() -> Self {
        Self::with_config(InjectorConfig::default())
    }

    pub fn with_config(config: InjectorConfig) -> Self {
        Self::with_backend(WindowsBackend::new(), config)
    }
}

#[cfg(windows)]
impl Default for Injector<WindowsBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Injector<B> {
    /// Injector over an arbitrary backend, e.g. the fake one for tests.
    pub fn with_backend(backend: B, config: InjectorConfig) -> Self {
        Self {
            backend,
            config,
            process: None,
            symbols_ready: false,
            buffer: None,
            injected_base: 0,
            functions: FunctionTable::new(),
        }
    }

    /// Configure the name of the injected library's notify export.
    /// Must be called before [`Injector::load`].
    pub fn set_notify_name(&mut self, name: &str) -> InjectResult<()> {
        if self.process.is_some() {
            return Err(InjectorError::AlreadyAttached);
        }
        self.functions.set_name(FunctionRole::Notify, name);
        Ok(())
    }

    /// Attach to `pid` and inject the library at `library_path`.
    ///
    /// Acquisition order: process attachment, symbol context, base system
    /// library registration, remote argument buffer, then the injection
    /// itself. A failure at any step releases everything acquired so far
    /// and leaves the instance as freshly constructed.
    pub fn load(&mut self, pid: u32, library_path: &Path) -> InjectResult<()> {
        if self.process.is_some() {
            return Err(InjectorError::AlreadyAttached);
        }

        log::info!("injecting {} into process {}", library_path.display(), pid);
        if let Err(error) = self.try_load(pid, library_path) {
            log::warn!("injection failed, rolling back: {}", error);
            self.unload();
            return Err(error);
        }

        log::info!("library injected at 0x{:X}", self.injected_base);
        Ok(())
    }

    /// Detach from the target and release every held resource.
    ///
    /// If the library was injected, its free-library export is invoked
    /// first, best-effort: a failure there is logged and teardown proceeds
    /// through the remaining steps regardless. Safe to call repeatedly.
    pub fn unload(&mut self) {
        if self.process.is_none() {
            return;
        }

        if self.injected_base != 0 {
            let base = self.injected_base;
            if let Err(error) = self.invoke(FunctionRole::FreeLibrary, RemoteArg::Value(base)) {
                log::warn!("remote free-library call failed: {}", error);
            }
        }

        if let Some(process) = self.process.take() {
            if let Some(buffer) = self.buffer.take() {
                self.backend.release(&process, buffer.address);
            }
            if self.symbols_ready {
                self.backend.teardown_symbols(&process);
                self.symbols_ready = false;
            }
            self.backend.detach(&process);
        }

        self.injected_base = 0;
        self.functions.reset();
        log::debug!("injector reset to detached state");
    }

    /// Send an opaque payload to the injected library's notify export.
    /// Only valid while attached with a successfully injected library.
    pub fn call_notify(&mut self, payload: &[u8]) -> InjectResult<()> {
        if self.process.is_none() {
            return Err(InjectorError::NotAttached);
        }
        if self.injected_base == 0 {
            return Err(InjectorError::NotInjected);
        }
        self.invoke(FunctionRole::Notify, RemoteArg::Payload(payload))
    }

    /// Whether a target process is currently attached.
    pub fn is_attached(&self) -> bool {
        self.process.is_some()
    }

    /// Whether the library is injected and its notify export callable.
    pub fn is_injected(&self) -> bool {
        self.injected_base != 0
    }

    /// Base address of the injected library, zero when not injected.
    pub fn injected_base(&self) -> u64 {
        self.injected_base
    }

    /// The backend this injector drives.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn attached(&self) -> InjectResult<&B::Process> {
        self.process.as_ref().ok_or(InjectorError::NotAttached)
    }

    fn try_load(&mut self, pid: u32, library_path: &Path) -> InjectResult<()> {
        self.process = Some(self.backend.attach(pid)?);

        self.backend.init_symbols(self.attached()?)?;
        self.symbols_ready = true;

        // The loader exports live in the base system library.
        symbols::register_module(&self.backend, self.attached()?, SYSTEM_MODULE)?;

        let address = self
            .backend
            .allocate(self.attached()?, self.config.buffer_capacity)?;
        self.buffer = Some(RemoteBuffer {
            address,
            capacity: self.config.buffer_capacity,
        });

        self.inject_library(library_path)
    }

    fn inject_library(&mut self, library_path: &Path) -> InjectResult<()> {
        let full_path = resolve_full_path(library_path, self.config.max_path_len)?;
        let file_name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                InjectorError::PathResolveFailed(std::io::Error::other("path has no file name"))
            })?;

        let payload = wide_path_bytes(&full_path.to_string_lossy());
        self.invoke(FunctionRole::LoadLibrary, RemoteArg::Payload(&payload))?;

        // The library is in the module list now; register it so its notify
        // export resolves.
        let base = symbols::register_module(&self.backend, self.attached()?, &file_name)?;
        self.injected_base = base;
        Ok(())
    }

    /// Resolve the role's address, marshal the argument, run one remote
    /// thread at that address and wait for it within the configured bound.
    fn invoke(&mut self, role: FunctionRole, argument: RemoteArg<'_>) -> InjectResult<()> {
        let process = self.process.as_ref().ok_or(InjectorError::NotAttached)?;
        let address = self.functions.resolve(&self.backend, process, role)?;

        let parameter = match argument {
            RemoteArg::Value(value) => value,
            RemoteArg::Payload(bytes) => {
                let buffer = self.buffer.as_ref().ok_or(InjectorError::NotAttached)?;
                if bytes.len() > buffer.capacity {
                    return Err(InjectorError::PayloadTooLarge {
                        size: bytes.len(),
                        capacity: buffer.capacity,
                    });
                }
                self.backend.write_bytes(process, buffer.address, bytes)?;
                buffer.address
            }
        };

        let thread = self.backend.start_thread(process, address, parameter)?;
        self.backend.wait_thread(thread, self.config.invoke_wait)
    }
}

impl<B: Backend> Drop for Injector<B> {
    fn drop(&mut self) {
        self.unload();
    }
}

fn resolve_full_path(library_path: &Path, max_len: usize) -> InjectResult<PathBuf> {
    let full = std::path::absolute(library_path).map_err(InjectorError::PathResolveFailed)?;
    let len = full.as_os_str().len();
    if len > max_len {
        return Err(InjectorError::PathTooLong { len, max: max_len });
    }
    Ok(full)
}

/// UTF-16 little-endian bytes of `text` plus a terminating NUL, the form
/// the target-side loader expects to find in the argument buffer.
fn wide_path_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;

    #[test]
    fn wide_path_bytes_are_nul_terminated_utf16() {
        let bytes = wide_path_bytes("ab");
        assert_eq!(bytes, vec![b'a', 0, b'b', 0, 0, 0]);
    }

    #[test]
    fn overlong_path_is_rejected() {
        let long = "x".repeat(64);
        let result = resolve_full_path(Path::new(&long), 16);
        assert!(matches!(result, Err(InjectorError::PathTooLong { .. })));
    }

    #[test]
    fn notify_name_is_frozen_while_attached() {
        let backend = FakeBackend::new();
        backend.add_process(7);
        backend.add_module(
            SYSTEM_MODULE,
            0x1000,
            &[
                (symbols::LOAD_LIBRARY_EXPORT, 0x1100),
                (symbols::FREE_LIBRARY_EXPORT, 0x1200),
            ],
        );
        backend.add_loadable("probe.dll", 0x9000, &[("probe_notify", 0x9100)]);

        let mut injector = Injector::with_backend(backend, InjectorConfig::default());
        injector.set_notify_name("probe_notify").unwrap();
        injector.load(7, Path::new("probe.dll")).unwrap();

        assert!(matches!(
            injector.set_notify_name("other_notify"),
            Err(InjectorError::AlreadyAttached)
        ));
    }
}

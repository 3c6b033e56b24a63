//! Named remote functions: the resolve-once address cache and module
//! registration against the symbol handler.

use crate::backend::Backend;
use crate::error::{InjectResult, InjectorError};

/// Loader export used to pull the library into the target.
pub const LOAD_LIBRARY_EXPORT: &str = "LoadLibraryW";

/// Loader export used to drop the library from the target.
pub const FREE_LIBRARY_EXPORT: &str = "FreeLibrary";

/// Base system library registered first; it carries the loader exports.
pub const SYSTEM_MODULE: &str = "kernel32.dll";

/// The closed set of remote functions the injector calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRole {
    /// The target-side library loader.
    LoadLibrary,
    /// The target-side library unloader.
    FreeLibrary,
    /// The injected library's configurable notify export.
    Notify,
}

const ROLE_COUNT: usize = 3;

impl FunctionRole {
    fn index(self) -> usize {
        match self {
            FunctionRole::LoadLibrary => 0,
            FunctionRole::FreeLibrary => 1,
            FunctionRole::Notify => 2,
        }
    }
}

/// One named remote function and its cached in-target address.
/// An address of zero means "not resolved yet".
#[derive(Debug, Clone)]
struct RemoteFunction {
    name: String,
    address: u64,
}

/// Role-keyed table of remote functions.
///
/// Loader names are fixed at construction; the notify name starts empty and
/// is set by the caller before attachment. Addresses are resolved on first
/// use and kept for the lifetime of the attachment.
#[derive(Debug)]
pub(crate) struct FunctionTable {
    slots: [RemoteFunction; ROLE_COUNT],
}

impl FunctionTable {
    pub fn new() -> Self {
        let slot = |name: &str| RemoteFunction {
            name: name.to_string(),
            address: 0,
        };
        Self {
            slots: [slot(LOAD_LIBRARY_EXPORT), slot(FREE_LIBRARY_EXPORT), slot("")],
        }
    }

    pub fn set_name(&mut self, role: FunctionRole, name: &str) {
        self.slots[role.index()].name = name.to_string();
    }

    pub fn name(&self, role: FunctionRole) -> &str {
        &self.slots[role.index()].name
    }

    /// Address of the role's function, or the zero sentinel if the role has
    /// not been resolved in this attachment.
    pub fn address(&self, role: FunctionRole) -> u64 {
        self.slots[role.index()].address
    }

    /// Resolve the role's name to an address, caching the result. A cached
    /// address is returned without consulting the backend again.
    pub fn resolve<B: Backend>(
        &mut self,
        backend: &B,
        process: &B::Process,
        role: FunctionRole,
    ) -> InjectResult<u64> {
        let slot = &mut self.slots[role.index()];
        if slot.address != 0 {
            return Ok(slot.address);
        }
        if slot.name.is_empty() {
            return Err(InjectorError::NotifyUnconfigured);
        }

        slot.address = backend.resolve_symbol(process, &slot.name)?;
        Ok(slot.address)
    }

    /// Forget every cached address; names survive so the table can be
    /// reused for the next attachment.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.address = 0;
        }
    }
}

/// Find `name` in the target's module snapshot (case-insensitive, first
/// match wins) and register it with the symbol handler so its exports
/// become resolvable. Returns the module's base address.
pub(crate) fn register_module<B: Backend>(
    backend: &B,
    process: &B::Process,
    name: &str,
) -> InjectResult<u64> {
    let snapshot = backend.module_snapshot(process)?;
    let module = snapshot
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| InjectorError::ModuleNotFound(name.to_string()))?;

    backend.register_module(process, module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;

    fn backend_with_kernel32() -> FakeBackend {
        let backend = FakeBackend::new();
        backend.add_process(7);
        backend.add_module(
            SYSTEM_MODULE,
            0x1000,
            &[(LOAD_LIBRARY_EXPORT, 0x1100), (FREE_LIBRARY_EXPORT, 0x1200)],
        );
        backend
    }

    #[test]
    fn resolve_caches_the_address() {
        let backend = backend_with_kernel32();
        let process = backend.attach(7).unwrap();
        backend.init_symbols(&process).unwrap();
        register_module(&backend, &process, SYSTEM_MODULE).unwrap();

        let mut table = FunctionTable::new();
        let first = table
            .resolve(&backend, &process, FunctionRole::LoadLibrary)
            .unwrap();
        let second = table
            .resolve(&backend, &process, FunctionRole::LoadLibrary)
            .unwrap();

        assert_eq!(first, 0x1100);
        assert_eq!(first, second);
        assert_eq!(backend.lookup_count(LOAD_LIBRARY_EXPORT), 1);
    }

    #[test]
    fn unconfigured_notify_is_rejected_without_a_lookup() {
        let backend = backend_with_kernel32();
        let process = backend.attach(7).unwrap();
        backend.init_symbols(&process).unwrap();

        let mut table = FunctionTable::new();
        let result = table.resolve(&backend, &process, FunctionRole::Notify);

        assert!(matches!(result, Err(InjectorError::NotifyUnconfigured)));
        assert_eq!(backend.lookup_count(""), 0);
    }

    #[test]
    fn reset_clears_addresses_but_keeps_names() {
        let backend = backend_with_kernel32();
        let process = backend.attach(7).unwrap();
        backend.init_symbols(&process).unwrap();
        register_module(&backend, &process, SYSTEM_MODULE).unwrap();

        let mut table = FunctionTable::new();
        table.set_name(FunctionRole::Notify, "agent_notify");
        table
            .resolve(&backend, &process, FunctionRole::LoadLibrary)
            .unwrap();

        table.reset();
        assert_eq!(table.address(FunctionRole::LoadLibrary), 0);
        assert_eq!(table.name(FunctionRole::Notify), "agent_notify");
    }

    #[test]
    fn module_matching_is_case_insensitive() {
        let backend = backend_with_kernel32();
        let process = backend.attach(7).unwrap();
        backend.init_symbols(&process).unwrap();

        let base = register_module(&backend, &process, "KERNEL32.DLL").unwrap();
        assert_eq!(base, 0x1000);
    }

    #[test]
    fn missing_module_is_reported_by_name() {
        let backend = backend_with_kernel32();
        let process = backend.attach(7).unwrap();

        let result = register_module(&backend, &process, "missing.dll");
        assert!(
            matches!(result, Err(InjectorError::ModuleNotFound(name)) if name == "missing.dll")
        );
    }
}

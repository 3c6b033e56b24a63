//! In-memory stand-in for the OS capability surface.
//!
//! Models just enough of a target process to drive the whole injection
//! sequence without one: a module list with named exports, a symbol handler
//! that only resolves registered modules, allocation and handle counters,
//! and a loader simulation — starting a remote thread at an export named
//! `LoadLibraryW` makes the staged library appear in the module list, and
//! `FreeLibrary` removes it again.
//!
//! Used by the crate's own test suite; also handy for exercising callers of
//! the injector in environments without a live target.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::backend::{Backend, ModuleRecord};
use crate::error::{InjectResult, InjectorError};

#[derive(Clone)]
struct FakeModule {
    record: ModuleRecord,
    exports: HashMap<String, u64>,
}

#[derive(Default)]
struct FakeState {
    pids: Vec<u32>,
    modules: Vec<FakeModule>,
    loadable: Vec<FakeModule>,
    registered: Vec<String>,
    allocations: HashMap<u64, usize>,
    memory: HashMap<u64, Vec<u8>>,
    lookups: HashMap<String, u32>,
    next_allocation: u64,
    open_attachments: u32,
    symbol_contexts: u32,
    writes: u32,
    threads_started: Vec<(u64, u64)>,
    threads_joined: u32,
    fail_allocations: bool,
    fail_writes: bool,
    hang_threads: bool,
}

/// Fake backend with observable resource counters and failure switches.
///
/// Clones share one underlying target, so a clone kept outside the injector
/// still sees every counter after the injector is gone.
#[derive(Clone)]
pub struct FakeBackend {
    state: Rc<RefCell<FakeState>>,
}

/// Attachment token handed out by [`FakeBackend::attach`].
pub struct FakeProcess {
    pid: u32,
}

impl FakeProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// A started fake thread, pending its join.
pub struct FakeThread {
    hang: bool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState {
                next_allocation: 0x2000_0000,
                ..FakeState::default()
            })),
        }
    }

    /// Declare `pid` a valid attachment target.
    pub fn add_process(&self, pid: u32) {
        self.state.borrow_mut().pids.push(pid);
    }

    /// Put a module with the given exports into the target's module list.
    pub fn add_module(&self, name: &str, base: u64, exports: &[(&str, u64)]) {
        self.state.borrow_mut().modules.push(FakeModule {
            record: ModuleRecord {
                name: name.to_string(),
                path: PathBuf::from(name),
                base,
                size: 0x1000,
            },
            exports: exports
                .iter()
                .map(|(n, a)| (n.to_string(), *a))
                .collect(),
        });
    }

    /// Stage a library that appears in the module list once a remote
    /// `LoadLibraryW` call names its file.
    pub fn add_loadable(&self, file_name: &str, base: u64, exports: &[(&str, u64)]) {
        self.state.borrow_mut().loadable.push(FakeModule {
            record: ModuleRecord {
                name: file_name.to_string(),
                path: PathBuf::from(file_name),
                base,
                size: 0x1000,
            },
            exports: exports
                .iter()
                .map(|(n, a)| (n.to_string(), *a))
                .collect(),
        });
    }

    pub fn fail_allocations(&self) {
        self.state.borrow_mut().fail_allocations = true;
    }

    pub fn fail_writes(&self) {
        self.state.borrow_mut().fail_writes = true;
    }

    /// Make every started thread miss its wait bound.
    pub fn hang_remote_threads(&self) {
        self.state.borrow_mut().hang_threads = true;
    }

    /// Attachments opened and not yet closed.
    pub fn open_attachments(&self) -> u32 {
        self.state.borrow().open_attachments
    }

    /// Symbol contexts initialized and not yet torn down.
    pub fn symbol_contexts(&self) -> u32 {
        self.state.borrow().symbol_contexts
    }

    /// Remote allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.state.borrow().allocations.len()
    }

    /// How many times `name` was looked up in the symbol handler.
    pub fn lookup_count(&self, name: &str) -> u32 {
        self.state.borrow().lookups.get(name).copied().unwrap_or(0)
    }

    /// Total remote memory writes performed.
    pub fn write_count(&self) -> u32 {
        self.state.borrow().writes
    }

    /// Remote threads started so far, as `(entry, parameter)` pairs.
    pub fn threads_started(&self) -> Vec<(u64, u64)> {
        self.state.borrow().threads_started.clone()
    }

    /// Remote thread handles released so far.
    pub fn threads_joined(&self) -> u32 {
        self.state.borrow().threads_joined
    }

    /// Whether a module with this file name is currently in the module list.
    pub fn has_module(&self, name: &str) -> bool {
        self.state
            .borrow()
            .modules
            .iter()
            .any(|m| m.record.name.eq_ignore_ascii_case(name))
    }

    /// Bytes last written at `address`, if any.
    pub fn bytes_at(&self, address: u64) -> Option<Vec<u8>> {
        self.state.borrow().memory.get(&address).cloned()
    }

    fn export_name_at(state: &FakeState, address: u64) -> Option<String> {
        for module in &state.modules {
            for (name, export) in &module.exports {
                if *export == address {
                    return Some(name.clone());
                }
            }
        }
        None
    }

    /// Decode the UTF-16 string staged at `parameter` and, if its file name
    /// matches a staged loadable, move that library into the module list.
    fn simulate_load_library(state: &mut FakeState, parameter: u64) {
        let Some(bytes) = state.memory.get(&parameter) else {
            return;
        };

        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        let path = String::from_utf16_lossy(&units);
        let file_name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();

        if let Some(index) = state
            .loadable
            .iter()
            .position(|m| m.record.name.eq_ignore_ascii_case(&file_name))
        {
            let module = state.loadable.remove(index);
            state.modules.push(module);
        }
    }

    fn simulate_free_library(state: &mut FakeState, base: u64) {
        if let Some(index) = state.modules.iter().position(|m| m.record.base == base) {
            let module = state.modules.remove(index);
            state.registered.retain(|name| *name != module.record.name);
        }
    }
}

impl Backend for FakeBackend {
    type Process = FakeProcess;
    type Thread = FakeThread;

    fn attach(&self, pid: u32) -> InjectResult<FakeProcess> {
        let mut state = self.state.borrow_mut();
        if !state.pids.contains(&pid) {
            return Err(InjectorError::OpenProcessFailed(
                pid,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        state.open_attachments += 1;
        Ok(FakeProcess { pid })
    }

    fn detach(&self, _process: &FakeProcess) {
        self.state.borrow_mut().open_attachments -= 1;
    }

    fn init_symbols(&self, _process: &FakeProcess) -> InjectResult<()> {
        self.state.borrow_mut().symbol_contexts += 1;
        Ok(())
    }

    fn teardown_symbols(&self, _process: &FakeProcess) {
        let mut state = self.state.borrow_mut();
        state.symbol_contexts -= 1;
        state.registered.clear();
    }

    fn module_snapshot(&self, _process: &FakeProcess) -> InjectResult<Vec<ModuleRecord>> {
        Ok(self
            .state
            .borrow()
            .modules
            .iter()
            .map(|m| m.record.clone())
            .collect())
    }

    fn register_module(&self, _process: &FakeProcess, module: &ModuleRecord) -> InjectResult<u64> {
        let mut state = self.state.borrow_mut();
        let name = module.name.clone();
        if !state.registered.contains(&name) {
            state.registered.push(name);
        }
        Ok(module.base)
    }

    fn resolve_symbol(&self, _process: &FakeProcess, name: &str) -> InjectResult<u64> {
        let mut state = self.state.borrow_mut();
        *state.lookups.entry(name.to_string()).or_insert(0) += 1;

        let address = state
            .modules
            .iter()
            .filter(|m| state.registered.contains(&m.record.name))
            .find_map(|m| m.exports.get(name).copied());

        address.ok_or_else(|| InjectorError::SymbolNotFound(name.to_string()))
    }

    fn allocate(&self, _process: &FakeProcess, size: usize) -> InjectResult<u64> {
        let mut state = self.state.borrow_mut();
        if state.fail_allocations {
            return Err(InjectorError::AllocationFailed(std::io::Error::from(
                std::io::ErrorKind::OutOfMemory,
            )));
        }

        let address = state.next_allocation;
        state.next_allocation += (size as u64).next_multiple_of(0x1000);
        state.allocations.insert(address, size);
        Ok(address)
    }

    fn release(&self, _process: &FakeProcess, address: u64) {
        let mut state = self.state.borrow_mut();
        state.allocations.remove(&address);
        state.memory.remove(&address);
    }

    fn write_bytes(&self, _process: &FakeProcess, address: u64, bytes: &[u8]) -> InjectResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(InjectorError::WriteFailed(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }

        let capacity = state.allocations.get(&address).copied();
        match capacity {
            Some(capacity) if bytes.len() <= capacity => {
                state.writes += 1;
                state.memory.insert(address, bytes.to_vec());
                Ok(())
            }
            _ => Err(InjectorError::WriteFailed(std::io::Error::other(
                "write outside any allocation",
            ))),
        }
    }

    fn start_thread(
        &self,
        _process: &FakeProcess,
        entry: u64,
        parameter: u64,
    ) -> InjectResult<FakeThread> {
        let mut state = self.state.borrow_mut();
        state.threads_started.push((entry, parameter));

        let hang = state.hang_threads;
        if !hang {
            match Self::export_name_at(&state, entry).as_deref() {
                Some("LoadLibraryW") => Self::simulate_load_library(&mut state, parameter),
                Some("FreeLibrary") => Self::simulate_free_library(&mut state, parameter),
                _ => {}
            }
        }

        Ok(FakeThread { hang })
    }

    fn wait_thread(&self, thread: FakeThread, timeout: Duration) -> InjectResult<()> {
        self.state.borrow_mut().threads_joined += 1;
        if thread.hang {
            return Err(InjectorError::WaitTimeout(timeout));
        }
        Ok(())
    }
}

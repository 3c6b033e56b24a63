//! Lifecycle tests against the fake backend: full injection sequence,
//! rollback on partial failure, and precondition enforcement — no live
//! target process required.

use std::path::Path;

use inject_core::symbols::{FREE_LIBRARY_EXPORT, LOAD_LIBRARY_EXPORT, SYSTEM_MODULE};
use inject_core::{FakeBackend, InjectResult, Injector, InjectorConfig, InjectorError};

const TARGET_PID: u32 = 4242;
const KERNEL32_BASE: u64 = 0x7FF8_1000_0000;
const LOADLIB_ADDR: u64 = KERNEL32_BASE + 0x100;
const FREELIB_ADDR: u64 = KERNEL32_BASE + 0x200;
const PROBE_BASE: u64 = 0x7FF8_2000_0000;
const NOTIFY_ADDR: u64 = PROBE_BASE + 0x100;

/// A target with the base system library loaded and `probe.dll` ready to
/// appear once the remote loader is invoked.
fn fake_target() -> FakeBackend {
    let backend = FakeBackend::new();
    backend.add_process(TARGET_PID);
    backend.add_module(
        SYSTEM_MODULE,
        KERNEL32_BASE,
        &[
            (LOAD_LIBRARY_EXPORT, LOADLIB_ADDR),
            (FREE_LIBRARY_EXPORT, FREELIB_ADDR),
        ],
    );
    backend.add_loadable("probe.dll", PROBE_BASE, &[("probe_notify", NOTIFY_ADDR)]);
    backend
}

fn injector(backend: FakeBackend) -> Injector<FakeBackend> {
    let mut injector = Injector::with_backend(backend, InjectorConfig::default());
    injector
        .set_notify_name("probe_notify")
        .expect("not attached yet");
    injector
}

fn load_probe(injector: &mut Injector<FakeBackend>) -> InjectResult<()> {
    injector.load(TARGET_PID, Path::new("probe.dll"))
}

fn assert_detached_baseline(injector: &Injector<FakeBackend>) {
    assert!(!injector.is_attached());
    assert!(!injector.is_injected());
    assert_eq!(injector.injected_base(), 0);
}

fn assert_no_leaked_resources(backend: &FakeBackend) {
    assert_eq!(backend.open_attachments(), 0, "process handle leaked");
    assert_eq!(backend.symbol_contexts(), 0, "symbol context leaked");
    assert_eq!(backend.live_allocations(), 0, "remote allocation leaked");
}

#[test]
fn end_to_end_inject_notify_unload() {
    let mut injector = injector(fake_target());

    load_probe(&mut injector).expect("load should succeed");
    assert!(injector.is_attached());
    assert!(injector.is_injected());
    assert_eq!(injector.injected_base(), PROBE_BASE);

    let payload = *b"0123456789abcdef";
    injector.call_notify(&payload).expect("notify should succeed");

    // The notify thread ran at the resolved export with the buffer address
    // as its parameter, and the payload was staged there beforehand.
    {
        let backend = injector.backend();
        let threads = backend.threads_started();
        let (entry, parameter) = *threads.last().unwrap();
        assert_eq!(entry, NOTIFY_ADDR);
        assert_eq!(backend.bytes_at(parameter).as_deref(), Some(&payload[..]));
    }

    injector.unload();
    assert_detached_baseline(&injector);
    assert_no_leaked_resources(injector.backend());
    assert!(
        !injector.backend().has_module("probe.dll"),
        "free-library should drop the injected module"
    );
}

#[test]
fn invalid_pid_leaves_a_fresh_instance() {
    let mut injector = injector(fake_target());

    let result = injector.load(1, Path::new("probe.dll"));
    assert!(matches!(result, Err(InjectorError::OpenProcessFailed(1, _))));

    assert_detached_baseline(&injector);
    assert_no_leaked_resources(injector.backend());
}

#[test]
fn unload_is_idempotent() {
    let mut injector = injector(fake_target());
    load_probe(&mut injector).expect("load should succeed");

    injector.unload();
    assert_detached_baseline(&injector);
    let joined_after_first = injector.backend().threads_joined();

    injector.unload();
    assert_detached_baseline(&injector);
    assert_eq!(
        injector.backend().threads_joined(),
        joined_after_first,
        "second unload must not touch the target"
    );
    assert_no_leaked_resources(injector.backend());
}

#[test]
fn notify_is_rejected_before_load_and_after_unload() {
    let mut injector = injector(fake_target());

    assert!(matches!(
        injector.call_notify(b"ping"),
        Err(InjectorError::NotAttached)
    ));
    assert_eq!(injector.backend().write_count(), 0);
    assert!(injector.backend().threads_started().is_empty());

    load_probe(&mut injector).expect("load should succeed");
    injector.unload();
    let writes = injector.backend().write_count();
    let threads = injector.backend().threads_started().len();

    assert!(matches!(
        injector.call_notify(b"ping"),
        Err(InjectorError::NotAttached)
    ));
    assert_eq!(injector.backend().write_count(), writes);
    assert_eq!(injector.backend().threads_started().len(), threads);
}

#[test]
fn each_function_name_is_looked_up_exactly_once() {
    let mut injector = injector(fake_target());
    load_probe(&mut injector).expect("load should succeed");

    injector.call_notify(b"one").unwrap();
    injector.call_notify(b"two").unwrap();
    injector.call_notify(b"three").unwrap();

    let backend = injector.backend();
    assert_eq!(backend.lookup_count(LOAD_LIBRARY_EXPORT), 1);
    assert_eq!(backend.lookup_count("probe_notify"), 1);
}

#[test]
fn oversized_payload_is_rejected_before_any_write() {
    let mut injector = injector(fake_target());
    load_probe(&mut injector).expect("load should succeed");
    let writes_after_load = injector.backend().write_count();

    let oversized = vec![0u8; InjectorConfig::default().buffer_capacity + 1];
    let result = injector.call_notify(&oversized);

    assert!(matches!(result, Err(InjectorError::PayloadTooLarge { .. })));
    assert_eq!(injector.backend().write_count(), writes_after_load);
}

#[test]
fn module_matching_ignores_case() {
    let backend = FakeBackend::new();
    backend.add_process(TARGET_PID);
    // Registered with mixed case, looked up as lower-case by the injector.
    backend.add_module(
        "Kernel32.DLL",
        KERNEL32_BASE,
        &[
            (LOAD_LIBRARY_EXPORT, LOADLIB_ADDR),
            (FREE_LIBRARY_EXPORT, FREELIB_ADDR),
        ],
    );
    backend.add_loadable("Probe.DLL", PROBE_BASE, &[("probe_notify", NOTIFY_ADDR)]);

    let mut injector = injector(backend);
    injector
        .load(TARGET_PID, Path::new("probe.dll"))
        .expect("matching must ignore case");
    assert_eq!(injector.injected_base(), PROBE_BASE);
}

#[test]
fn allocation_failure_unwinds_handle_and_symbol_context() {
    let backend = fake_target();
    backend.fail_allocations();

    let mut injector = injector(backend);
    let result = load_probe(&mut injector);

    assert!(matches!(result, Err(InjectorError::AllocationFailed(_))));
    assert_detached_baseline(&injector);
    assert_no_leaked_resources(injector.backend());
}

#[test]
fn missing_library_in_snapshot_unwinds_fully() {
    let backend = fake_target();

    let mut injector = injector(backend);
    // The remote loader never makes this file appear in the module list.
    let result = injector.load(TARGET_PID, Path::new("absent.dll"));

    assert!(
        matches!(result, Err(InjectorError::ModuleNotFound(name)) if name == "absent.dll")
    );
    assert_detached_baseline(&injector);
    assert_no_leaked_resources(injector.backend());
}

#[test]
fn hung_remote_thread_times_out_and_unwinds() {
    let backend = fake_target();
    backend.hang_remote_threads();

    let mut injector = injector(backend);
    let result = load_probe(&mut injector);

    assert!(matches!(result, Err(InjectorError::WaitTimeout(_))));
    assert_detached_baseline(&injector);

    let backend = injector.backend();
    assert_no_leaked_resources(backend);
    // The wait gave up, but the thread handle was still released.
    assert_eq!(backend.threads_started().len() as u32, backend.threads_joined());
}

#[test]
fn dropping_an_attached_injector_unloads() {
    let backend = fake_target();
    let observer = backend.clone();

    let mut injector = injector(backend);
    load_probe(&mut injector).expect("load should succeed");
    drop(injector);

    assert_no_leaked_resources(&observer);
    assert!(!observer.has_module("probe.dll"));
}

#[test]
fn notify_without_a_configured_name_fails_resolution() {
    let backend = fake_target();
    let mut injector = Injector::with_backend(backend, InjectorConfig::default());

    // No set_notify_name: injection works, the notify role does not.
    injector
        .load(TARGET_PID, Path::new("probe.dll"))
        .expect("load should succeed");
    assert!(matches!(
        injector.call_notify(b"ping"),
        Err(InjectorError::NotifyUnconfigured)
    ));
}

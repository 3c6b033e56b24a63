//! Walk the whole injection sequence against the fake backend.
//!
//! Runs on any host; useful for seeing the lifecycle and its log output
//! without a live target process.
//!
//! Usage:
//!   cargo run --example dry_run

use std::path::Path;

use inject_core::{FakeBackend, Injector, InjectorConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let backend = FakeBackend::new();
    backend.add_process(4242);
    backend.add_module(
        "kernel32.dll",
        0x7FF8_1000_0000,
        &[
            ("LoadLibraryW", 0x7FF8_1000_0100),
            ("FreeLibrary", 0x7FF8_1000_0200),
        ],
    );
    backend.add_loadable("probe.dll", 0x7FF8_2000_0000, &[("probe_notify", 0x7FF8_2000_0100)]);

    let mut injector = Injector::with_backend(backend, InjectorConfig::default());
    injector.set_notify_name("probe_notify").unwrap();

    injector
        .load(4242, Path::new("probe.dll"))
        .expect("injection against the fake target should succeed");
    println!("injected at 0x{:X}", injector.injected_base());

    injector
        .call_notify(b"dry run payload")
        .expect("notify against the fake target should succeed");
    println!("notify delivered");

    injector.unload();
    println!("detached, all resources released");
}

//! Inject a library into a running process and fire its notify export.
//!
//! Usage:
//!   cargo run --example inject_and_notify -- <pid> <library_path> <notify_export>
//!
//! Example:
//!   cargo run --example inject_and_notify -- 1234 C:\agent\probe.dll probe_notify

#[cfg(windows)]
fn main() {
    use std::path::PathBuf;

    use inject_core::{Injector, PrivilegeManager};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("Usage: {} <pid> <library_path> <notify_export>", args[0]);
        std::process::exit(1);
    }

    let pid: u32 = args[1].parse().expect("PID must be a number");
    let library = PathBuf::from(&args[2]);
    let notify = &args[3];

    // Best-effort; own-user targets open without it.
    PrivilegeManager::try_enable_debug_privilege();

    let mut injector = Injector::new();
    injector.set_notify_name(notify).unwrap();

    if let Err(error) = injector.load(pid, &library) {
        eprintln!("injection failed: {}", error);
        std::process::exit(1);
    }
    println!("injected at 0x{:X}", injector.injected_base());

    match injector.call_notify(b"hello\0") {
        Ok(()) => println!("notify delivered"),
        Err(error) => eprintln!("notify failed: {}", error),
    }

    injector.unload();
    println!("unloaded");
}

#[cfg(not(windows))]
fn main() {
    eprintln!("this example requires a Windows target");
    std::process::exit(2);
}

//! Command-line front end: pick a target, inject the agent library,
//! optionally fire its notify export.

use std::path::PathBuf;

use clap::Parser;
use inject_core::config::{ARGUMENT_BUFFER_CAPACITY, REMOTE_CALL_WAIT};

#[cfg(windows)]
mod process_list;

#[derive(Parser)]
#[command(name = "inject-cli")]
#[command(about = "Inject an instrumentation library into a running process", long_about = None)]
struct Args {
    /// Target process name or PID
    #[arg(value_name = "PROCESS")]
    process: String,

    /// Path to the library to inject
    #[arg(value_name = "LIBRARY")]
    library: PathBuf,

    /// Name of the notify export the injected library exposes
    #[arg(short, long, value_name = "NAME")]
    notify: Option<String>,

    /// UTF-8 payload sent to the notify export after injection
    #[arg(short, long, value_name = "TEXT", requires = "notify")]
    payload: Option<String>,

    /// Bound on each remote call, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = REMOTE_CALL_WAIT.as_millis() as u64)]
    wait_ms: u64,

    /// Capacity of the remote argument buffer, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = ARGUMENT_BUFFER_CAPACITY)]
    buffer: usize,

    /// Leave the library loaded in the target on exit
    #[arg(long)]
    keep_loaded: bool,
}

#[cfg(windows)]
fn main() {
    use std::time::Duration;

    use inject_core::{Injector, InjectorConfig, PrivilegeManager};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let pid = match resolve_target(&args.process) {
        Ok(pid) => pid,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    };

    let library = if args.library.is_absolute() {
        args.library.clone()
    } else {
        std::env::current_dir()
            .expect("failed to get current directory")
            .join(&args.library)
    };
    if !library.exists() {
        eprintln!("library not found: {}", library.display());
        std::process::exit(1);
    }

    // Best-effort; targets owned by the same user open without it.
    PrivilegeManager::try_enable_debug_privilege();

    let config = InjectorConfig {
        buffer_capacity: args.buffer,
        invoke_wait: Duration::from_millis(args.wait_ms),
        ..InjectorConfig::default()
    };
    let mut injector = Injector::with_config(config);

    if let Some(ref notify) = args.notify {
        injector
            .set_notify_name(notify)
            .expect("notify name is set before load");
    }

    println!("injecting {} into PID {}...", library.display(), pid);
    if let Err(error) = injector.load(pid, &library) {
        eprintln!("injection failed: {}", error);
        eprintln!("hint: some targets require running as administrator");
        std::process::exit(1);
    }
    println!("injected at 0x{:X}", injector.injected_base());

    if let Some(ref payload) = args.payload {
        let mut bytes = payload.clone().into_bytes();
        bytes.push(0);
        match injector.call_notify(&bytes) {
            Ok(()) => println!("notify '{}' delivered", args.notify.as_deref().unwrap_or("")),
            Err(error) => {
                eprintln!("notify failed: {}", error);
                std::process::exit(1);
            }
        }
    }

    if args.keep_loaded {
        // Skip the unloading drop; the attachment handles die with this
        // process, the library stays in the target.
        std::mem::forget(injector);
        println!("library left loaded in the target");
        return;
    }

    println!("press Enter to unload and detach...");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    injector.unload();
    println!("unloaded");
}

#[cfg(windows)]
fn resolve_target(process: &str) -> Result<u32, String> {
    if let Ok(pid) = process.parse::<u32>() {
        return match process_list::pid_exists(pid) {
            Ok(true) => Ok(pid),
            Ok(false) => Err(format!("no process with PID {}", pid)),
            Err(error) => Err(format!("failed to enumerate processes: {}", error)),
        };
    }

    let matches = process_list::find_by_name(process)
        .map_err(|error| format!("failed to enumerate processes: {}", error))?;
    match matches.len() {
        0 => Err(format!("no process matches '{}'", process)),
        1 => Ok(matches[0].pid),
        _ => {
            log::warn!(
                "{} processes match '{}', using PID {}",
                matches.len(),
                process,
                matches[0].pid
            );
            Ok(matches[0].pid)
        }
    }
}

#[cfg(not(windows))]
fn main() {
    let _ = Args::parse();
    eprintln!("inject-cli requires a Windows target");
    std::process::exit(2);
}

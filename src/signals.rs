//! SIGINT / SIGTERM / SIGHUP handling
//!
//! The first signal only requests cancellation: the Step Engine stops before
//! the next step and a pending wait on a detached task returns. Running
//! external tools are never signalled. A second signal exits immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Install the handlers and return the shared cancellation flag.
pub fn install_cancel_handler() -> std::io::Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let flag = Arc::clone(&cancel);

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = signal_name(sig);
            if flag.swap(true, Ordering::SeqCst) {
                tracing::warn!("Received {} again, exiting", signal_name);
                // 128 + signal number, as a shell would report it
                std::process::exit(128 + sig);
            }
            tracing::warn!(
                "Received {}, stopping after the current operation (send again to exit now)",
                signal_name
            );
        }
    });

    Ok(cancel)
}

fn signal_name(sig: i32) -> &'static str {
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "UNKNOWN",
    }
}

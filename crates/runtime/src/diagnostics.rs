//! Runtime diagnostics for production debugging
//!
//! Provides a SIGQUIT (kill -3) handler that dumps runtime statistics to
//! stderr without stopping the process.
//!
//! ## Usage
//!
//! ```bash
//! TESSEL_DIAGNOSTICS=1 ./host &
//! kill -3 <pid>
//! ```
//!
//! ## Signal Safety
//!
//! `dump_diagnostics()` does I/O, which is not async-signal-safe. The handler
//! therefore runs on a dedicated thread that waits on signal-hook's iterator,
//! never inside the signal context itself. Only global atomics are read, so
//! the dump never touches interpreter-thread state.

use crate::bridge::{
    BRIDGES_OPEN, TASKS_CANCELLED, TASKS_PANICKED, TASKS_REJECTED, TASKS_RUN, TASKS_SUBMITTED,
};
use crate::coroutine::{TOTAL_DESTROYED, TOTAL_HOSTED, TOTAL_RESUMES};
use crate::notify::TOTAL_WAKEUPS;
use crate::timer::{TOTAL_TIMERS_FIRED, TOTAL_TIMERS_REVOKED};
use std::io::Write;
use std::sync::Once;
use std::sync::atomic::Ordering;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT signal handler for diagnostics
///
/// Called by the event loop when `TESSEL_DIAGNOSTICS` is set. Safe to call
/// multiple times (idempotent). A no-op without the `diagnostics` feature or
/// off Unix; `dump_diagnostics()` still works when called directly.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(all(unix, feature = "diagnostics"))]
        {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(%err, "could not register SIGQUIT handler");
                    return;
                }
            };

            let spawned = std::thread::Builder::new()
                .name("tessel-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_diagnostics();
                        }
                    }
                });
            if spawned.is_ok() {
                tracing::debug!("SIGQUIT diagnostics handler installed");
            }
        }
    });
}

/// Dump runtime diagnostics to stderr
pub fn dump_diagnostics() {
    let mut out = std::io::stderr().lock();
    // stderr is best effort
    let _ = write_report(&mut out);
}

/// Write the diagnostics report to `out`
pub fn write_report(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "\n=== Tessel Runtime Diagnostics ===")?;
    writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now())?;

    let hosted = TOTAL_HOSTED.load(Ordering::Relaxed);
    let destroyed = TOTAL_DESTROYED.load(Ordering::Relaxed);
    writeln!(out, "\n[Coroutines]")?;
    writeln!(out, "  Hosted:    {} (total)", hosted)?;
    writeln!(out, "  Destroyed: {} (total)", destroyed)?;
    writeln!(out, "  Live:      {}", hosted.saturating_sub(destroyed))?;
    writeln!(
        out,
        "  Resumes:   {} (total)",
        TOTAL_RESUMES.load(Ordering::Relaxed)
    )?;

    let submitted = TASKS_SUBMITTED.load(Ordering::Relaxed);
    let run = TASKS_RUN.load(Ordering::Relaxed);
    let cancelled = TASKS_CANCELLED.load(Ordering::Relaxed);
    let panicked = TASKS_PANICKED.load(Ordering::Relaxed);
    writeln!(out, "\n[Bridges]")?;
    writeln!(out, "  Open:      {}", BRIDGES_OPEN.load(Ordering::Relaxed))?;
    writeln!(out, "  Submitted: {} (total)", submitted)?;
    writeln!(out, "  Run:       {} (total)", run)?;
    writeln!(out, "  Cancelled: {} (total)", cancelled)?;
    writeln!(
        out,
        "  Rejected:  {} (submitted after close)",
        TASKS_REJECTED.load(Ordering::Relaxed)
    )?;
    writeln!(out, "  Wakeups:   {}", TOTAL_WAKEUPS.load(Ordering::Relaxed))?;

    // Everything accepted is either still queued, run, cancelled or panicked
    let settled = run + cancelled + panicked;
    writeln!(out, "  Queued:    {}", submitted.saturating_sub(settled))?;
    if panicked > 0 {
        writeln!(out, "  WARNING: {} tasks panicked", panicked)?;
    }

    writeln!(out, "\n[Timers]")?;
    writeln!(
        out,
        "  Fired:     {} (total)",
        TOTAL_TIMERS_FIRED.load(Ordering::Relaxed)
    )?;
    writeln!(
        out,
        "  Revoked:   {} (stopped before the fire ran)",
        TOTAL_TIMERS_REVOKED.load(Ordering::Relaxed)
    )?;

    writeln!(out, "\n=== End Diagnostics ===\n")
}

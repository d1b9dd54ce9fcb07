//! Termination-signal handling.
//!
//! The handler only records which signal arrived. Everything else, including
//! every backend call, happens on the loop thread once it observes the flag.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};

/// Signals that request a clean stop.
pub const SHUTDOWN_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGALRM,
];

/// Whether the monitor should keep running.
///
/// Holds 0 while running, otherwise the number of the signal that asked for
/// the stop. The first request wins and the state is never reset.
#[derive(Debug, Default)]
pub struct RunState {
    signal: AtomicI32,
}

static RUN_STATE: RunState = RunState::new();

impl RunState {
    pub const fn new() -> Self {
        Self {
            signal: AtomicI32::new(0),
        }
    }

    /// The process-wide state written by the installed signal handler.
    pub fn global() -> &'static RunState {
        &RUN_STATE
    }

    /// Record a stop request. Async-signal-safe.
    pub fn request_stop(&self, signal: i32) {
        let _ = self
            .signal
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.signal.load(Ordering::SeqCst) != 0
    }

    /// Signal that requested the stop, if any.
    pub fn signal(&self) -> Option<Signal> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            raw => Signal::try_from(raw).ok(),
        }
    }
}

extern "C" fn handle_shutdown_signal(signal: libc::c_int) {
    RUN_STATE.request_stop(signal);
}

/// Route [`SHUTDOWN_SIGNALS`] to [`RunState::global`].
pub fn install() -> Result<(), nix::errno::Errno> {
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for sig in SHUTDOWN_SIGNALS {
        unsafe { signal::sigaction(sig, &action) }?;
    }

    tracing::debug!(signals = ?SHUTDOWN_SIGNALS, "Shutdown handlers installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wins() {
        let state = RunState::new();
        assert!(!state.stop_requested());
        assert_eq!(state.signal(), None);

        state.request_stop(libc::SIGTERM);
        state.request_stop(libc::SIGINT);

        assert!(state.stop_requested());
        assert_eq!(state.signal(), Some(Signal::SIGTERM));
    }

    #[test]
    fn test_installed_handler_flags_global_state() {
        install().unwrap();
        assert!(!RunState::global().stop_requested());

        signal::raise(Signal::SIGALRM).unwrap();

        assert!(RunState::global().stop_requested());
        assert_eq!(RunState::global().signal(), Some(Signal::SIGALRM));
    }
}

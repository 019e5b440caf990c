/// Async-safe signal handling
///
/// The handler only stores atomics. Termination of the command and scope
/// teardown happen in ordinary control flow once a loop observes the flag.
use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Global signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

const HANDLED_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Anything loops can ask "should I stop now?"
pub trait ShutdownProbe {
    fn shutdown_requested(&self) -> bool;

    /// Signal number behind the request, 0 when none
    fn signal(&self) -> i32 {
        0
    }
}

/// Signal handler state
pub struct SignalHandler;

impl SignalHandler {
    /// Install handlers for SIGINT, SIGTERM, SIGHUP.
    /// Must be called before the command is forked.
    pub fn init() -> Result<Self, String> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for sig in HANDLED_SIGNALS {
            // SAFETY: the handler only touches atomics.
            unsafe {
                signal::sigaction(sig, &sig_action)
                    .map_err(|e| format!("Failed to install {} handler: {}", sig, e))?;
            }
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self)
    }

    /// Only performs atomic operations - no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    /// Get signal that was received (0 if none)
    pub fn get_signal(&self) -> i32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Reset shutdown flag (for testing)
    #[allow(dead_code)]
    pub(crate) fn reset(&self) {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }
}

impl ShutdownProbe for SignalHandler {
    fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    fn signal(&self) -> i32 {
        self.get_signal()
    }
}

impl ShutdownProbe for AtomicBool {
    fn shutdown_requested(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Probe that never fires
pub struct NeverShutdown;

impl ShutdownProbe for NeverShutdown {
    fn shutdown_requested(&self) -> bool {
        false
    }
}

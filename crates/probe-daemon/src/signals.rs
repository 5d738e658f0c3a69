//! Signal handling for graceful probe shutdown.
//!
//! SIGTERM and SIGINT set an atomic flag that the sampling loop polls at
//! cycle boundaries. Handlers are installed without `SA_RESTART`, so a
//! signal also interrupts a blocking FIFO open or write instead of waiting
//! for the reader.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::debug;

/// Set from the signal handler; async-signal-safe by construction.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
/// Signals delivered since handlers were installed.
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);
/// Raw number of the most recent signal.
static LAST_SIGNAL: AtomicU32 = AtomicU32::new(0);

/// Signal types that the probe handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    fn from_raw(raw: u32) -> Option<Self> {
        match Signal::try_from(i32::try_from(raw).ok()?).ok()? {
            Signal::SIGTERM => Some(Self::Terminate),
            Signal::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handle for signal management.
///
/// Only obtainable through [`SignalHandler::new`], so holding one means the
/// handlers are installed.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandler {
    _installed: (),
}

impl SignalHandler {
    /// Register SIGTERM and SIGINT handlers.
    pub fn new() -> std::io::Result<Self> {
        Self::register_handlers()?;
        Ok(Self { _installed: () })
    }

    fn register_handlers() -> std::io::Result<()> {
        extern "C" fn on_shutdown_signal(signal: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
            SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
            LAST_SIGNAL.store(signal.unsigned_abs(), Ordering::Relaxed);
        }

        let action = SigAction::new(
            SigHandler::Handler(on_shutdown_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );

        for signal in [Signal::SIGTERM, Signal::SIGINT] {
            // SAFETY: the handler only touches atomics.
            unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
        }

        debug!("Signal handlers registered");
        Ok(())
    }

    /// Check if a shutdown signal has been delivered.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_FLAG.load(Ordering::Relaxed)
    }

    /// Total number of shutdown signals received.
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }

    /// The most recent signal received, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
    }
}

//! Signal interception for the interactive shell.
//!
//! Handlers never touch shell state. They bump a counter and return; the main
//! loop drains the counters with [`SignalBridge::take`] and does the real
//! work (printing advisories, reaping jobs) synchronously.

use crate::error::ShellError;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);
static STOPS: AtomicUsize = AtomicUsize::new(0);
static CHILD_EVENTS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn on_signal(signo: libc::c_int) {
    let counter = match signo {
        libc::SIGINT => &INTERRUPTS,
        libc::SIGTSTP => &STOPS,
        libc::SIGCHLD => &CHILD_EVENTS,
        _ => return,
    };
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Deliveries observed since the previous [`SignalBridge::take`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub interrupts: usize,
    pub stops: usize,
    /// SIGCHLD deliveries. Informational only: the per-prompt poll reaps
    /// every tracked job whether or not this is zero, so a coalesced or
    /// missed SIGCHLD never delays a completion notice.
    pub child_events: usize,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        *self == Pending::default()
    }
}

/// Installed handlers for SIGINT, SIGTSTP and SIGCHLD.
///
/// Dropping the bridge puts the previous dispositions back.
pub struct SignalBridge {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalBridge {
    pub fn install() -> Result<Self, ShellError> {
        let mut bridge = SignalBridge {
            previous: Vec::with_capacity(3),
        };
        let handler = SigHandler::Handler(on_signal);
        let plan = [
            (Signal::SIGINT, SaFlags::SA_RESTART),
            (Signal::SIGTSTP, SaFlags::SA_RESTART),
            (Signal::SIGCHLD, SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP),
        ];
        for (signal, flags) in plan {
            let action = SigAction::new(handler, flags, SigSet::empty());
            // SAFETY: the handler only performs an atomic increment.
            let old = unsafe { sigaction(signal, &action) }.map_err(|e| {
                ShellError::FatalStartup(format!("cannot install {signal} handler: {e}"))
            })?;
            bridge.previous.push((signal, old));
        }
        debug!("signal handlers installed");
        Ok(bridge)
    }

    /// Drain and return everything delivered so far.
    pub fn take(&self) -> Pending {
        Pending {
            interrupts: INTERRUPTS.swap(0, Ordering::SeqCst),
            stops: STOPS.swap(0, Ordering::SeqCst),
            child_events: CHILD_EVENTS.swap(0, Ordering::SeqCst),
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        for (signal, old) in self.previous.drain(..).rev() {
            // SAFETY: restoring a disposition that was in place before install.
            let _ = unsafe { sigaction(signal, &old) };
        }
    }
}

/// Put SIGINT and SIGTSTP back to their defaults.
///
/// Called in a freshly forked child before exec so that external programs
/// react to the terminal the usual way. Only async-signal-safe calls happen here.
pub(crate) fn reset_for_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGTSTP] {
        // SAFETY: installing SIG_DFL has no handler to worry about.
        let _ = unsafe { sigaction(signal, &default) };
    }
}

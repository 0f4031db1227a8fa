//! Cooperative shutdown token and signal wiring.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

/// Granularity of [`ShutdownToken::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation flag passed explicitly into the event loop.
///
/// Setting it is a single atomic store, so it is safe to do from a signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early once cancelled.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

static SIGNAL_TOKEN: OnceLock<ShutdownToken> = OnceLock::new();

const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

extern "C" fn on_shutdown_signal(signum: nix::libc::c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        token.cancel();
    }
    // A second signal falls through to the default action.
    if let Ok(signal) = Signal::try_from(signum) {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring the default disposition is async-signal-safe.
        let _ = unsafe { sigaction(signal, &default) };
    }
}

/// Route SIGINT, SIGTERM and SIGHUP to `token`.
///
/// Only the first registered token receives signals.
pub fn install_signal_handlers(token: &ShutdownToken) -> nix::Result<()> {
    let _ = SIGNAL_TOKEN.set(token.clone());
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in SHUTDOWN_SIGNALS {
        // SAFETY: the handler only touches an initialised OnceLock and
        // calls sigaction.
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_sleep_returns_early_when_cancelled() {
        let token = ShutdownToken::new();
        assert!(token.sleep(Duration::from_millis(10)));

        let canceller = token.clone();
        let start = Instant::now();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        worker.join().unwrap();
    }
}

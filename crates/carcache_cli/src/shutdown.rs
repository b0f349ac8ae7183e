use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use console::Term;

/// Shutdown flag shared with the orchestrator and the watchdog.
#[derive(Clone, Default)]
pub(crate) struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    /// Check if shutdown has been requested.
    #[inline]
    pub(crate) fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// The raw flag, for library types that poll it.
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C stops dispatching new pages and lets in-flight work
/// finish; the second exits immediately.
pub(crate) fn setup_shutdown_handler() -> Shutdown {
    let shutdown = Shutdown::default();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current operations...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current operations");
        }

        handle.request();

        // Wait for second Ctrl+C for force quit
        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });

    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared() {
        let shutdown = Shutdown::default();
        let flag = shutdown.flag();
        assert!(!shutdown.is_requested());
        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(flag.load(Ordering::SeqCst));
    }
}

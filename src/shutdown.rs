//! Cooperative shutdown flag, set once from the signal handler and polled
//! at every loop boundary.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide shutdown flag. Clones share the same underlying bool.
///
/// The signal handler only stores the flag; all logging about the shutdown
/// happens on the main thread when the flag is next observed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Registers a SIGINT/SIGTERM/SIGHUP handler that sets this flag.
    pub fn install(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || flag.set())
            .context("Failed to register termination signal handler")
    }
}

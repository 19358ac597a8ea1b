//! Outermost restart loop: run relay sessions back to back, riding out
//! transient failures with a fixed cool-down, until shutdown.

use crate::relay::{RelaySession, RunSummary, SHUTDOWN_POLL};
use crate::shutdown::ShutdownFlag;
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Fixed pause between relay sessions. No backoff, no attempt limit: the
/// relay retries forever until signaled to stop.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(60);

/// The one operation the supervisor needs from a relay session.
pub trait Relay {
    fn run(&mut self) -> Result<RunSummary>;
}

impl Relay for RelaySession {
    fn run(&mut self) -> Result<RunSummary> {
        RelaySession::run(self)
    }
}

pub struct Supervisor<R: Relay> {
    relay: R,
    shutdown: ShutdownFlag,
    cooldown: Duration,
}

impl<R: Relay> Supervisor<R> {
    pub fn new(relay: R, shutdown: ShutdownFlag) -> Self {
        Self::with_cooldown(relay, shutdown, RESTART_COOLDOWN)
    }

    pub fn with_cooldown(relay: R, shutdown: ShutdownFlag, cooldown: Duration) -> Self {
        Self {
            relay,
            shutdown,
            cooldown,
        }
    }

    /// Runs sessions until the shutdown flag fires. Errors escaping a
    /// session (connection failures, mid-cycle surprises) are logged and
    /// treated as transient; nothing here is fatal to the process.
    pub fn run(&mut self) {
        while !self.shutdown.is_set() {
            info!("starting relay session");
            match self.relay.run() {
                Ok(summary) => info!(cycles = summary.cycles, "relay session ended"),
                Err(err) => error!("relay session failed: {err:#}"),
            }

            if !self.shutdown.is_set() {
                info!(
                    "cooling down for {}s before the next session",
                    self.cooldown.as_secs()
                );
                let deadline = Instant::now() + self.cooldown;
                while !self.shutdown.is_set() {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
                }
            }
        }
        info!("relay supervisor exited");
    }
}

//! The relay session engine: one SSH/SFTP session driven through a
//! send/wait loop until shutdown, liveness loss, or a scheduled refresh.

pub mod local;
pub mod remote;

use crate::config::{RelayConfig, Source};
use crate::shutdown::ShutdownFlag;
use crate::transport::{RemoteSink, Transport, TransportSession};
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use local::LocalSourceStrategy;
pub use remote::RemoteSourceStrategy;

/// Granularity at which sleeps re-check the shutdown flag. Bounds shutdown
/// latency while waiting out a send interval.
pub const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Outcome of one send cycle. Per-item failures are absorbed here; only
/// failures that invalidate the whole cycle surface as errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sent: usize,
    pub failed: usize,
}

/// One way of acquiring the per-cycle payload and pushing it at the sink.
/// Selected once at construction from validated configuration.
pub trait SourceStrategy {
    fn send(&self, sink: &dyn RemoteSink, iteration: u64) -> Result<CycleReport>;
}

/// Why and how a session's run loop ended, for diagnosis.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub cycles: u64,
    pub shutdown: bool,
    pub live: bool,
    pub refresh_due: bool,
}

/// Owns one transport session across a bounded run and drives the
/// send/wait loop. The cycle counter is scoped to this instance and reset
/// on every [`RelaySession::run`].
pub struct RelaySession {
    config: RelayConfig,
    strategy: Box<dyn SourceStrategy>,
    shutdown: ShutdownFlag,
    iteration: u64,
}

impl RelaySession {
    /// Builds a session with the strategy implied by the config's source.
    pub fn from_config(config: RelayConfig, shutdown: ShutdownFlag) -> Result<Self> {
        let relay = &config.relay;
        let strategy: Box<dyn SourceStrategy> = match &config.source {
            Source::Local { data_dir } => Box::new(LocalSourceStrategy::new(
                data_dir.clone(),
                relay.remote_path.clone(),
                relay.update_history_every,
            )),
            Source::Remote { piaware_host } => Box::new(RemoteSourceStrategy::new(
                piaware_host,
                relay.remote_path.clone(),
                relay.update_history_every,
            )?),
        };
        Ok(Self::with_strategy(config, strategy, shutdown))
    }

    pub fn with_strategy(
        config: RelayConfig,
        strategy: Box<dyn SourceStrategy>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            strategy,
            shutdown,
            iteration: 0,
        }
    }

    /// Runs the send/wait loop over one transport session.
    ///
    /// Connection errors during establishment propagate to the caller; loss
    /// of liveness and refresh-due are ordinary exits and return normally.
    /// The transport is torn down on every exit path: explicitly on the
    /// normal one, by drop order on the error one.
    pub fn run(&mut self) -> Result<RunSummary> {
        let relay = &self.config.relay;
        info!("connecting to remote host [{}]", relay.remote_host);
        let transport =
            TransportSession::open(&relay.remote_host, &relay.remote_user, &relay.remote_key)?;
        self.run_with(transport)
    }

    /// Drives the send/wait loop over an already established transport.
    /// Split from [`RelaySession::run`] so the loop can be exercised over a
    /// scripted transport.
    pub fn run_with(&mut self, transport: impl Transport) -> Result<RunSummary> {
        self.iteration = 0;
        let relay = self.config.relay.clone();

        if !relay.skip_remote_dir_creation {
            info!("verifying remote directory [{}]", relay.remote_path);
            transport.ensure_remote_dir(&relay.remote_path);
        }
        info!("initialization complete");

        while !self.shutdown.is_set()
            && transport.is_live()
            && !refresh_due(transport.age(), relay.refresh_session_hours)
        {
            let cycle_start = Instant::now();
            let report = self.strategy.send(&transport, self.iteration)?;
            self.iteration += 1;
            debug!(
                cycle = self.iteration,
                sent = report.sent,
                failed = report.failed,
                "cycle complete"
            );
            // If the channel is gone there is no point waiting out the interval.
            if transport.is_live() {
                self.wait(cycle_start);
            }
        }

        let summary = RunSummary {
            cycles: self.iteration,
            shutdown: self.shutdown.is_set(),
            live: transport.is_live(),
            refresh_due: refresh_due(transport.age(), relay.refresh_session_hours),
        };
        info!("run loop completed");
        info!("    cycles completed: {}", summary.cycles);
        info!("    shutdown requested: {}", summary.shutdown);
        info!("    session live: {}", summary.live);
        info!("    refresh due: {}", summary.refresh_due);
        transport.close();
        Ok(summary)
    }

    /// Sleeps out the remainder of the send interval, phase-aligned to the
    /// cycle start, re-checking the shutdown flag at [`SHUTDOWN_POLL`]
    /// granularity. Returns immediately if the flag is already set.
    pub fn wait(&self, cycle_start: Instant) {
        let total = sleep_duration(self.config.relay.send_interval_secs, cycle_start.elapsed());
        if total.is_zero() || self.shutdown.is_set() {
            return;
        }
        debug!(
            cycle = self.iteration,
            "sleeping for {:.1}s",
            total.as_secs_f64()
        );
        let deadline = Instant::now() + total;
        while !self.shutdown.is_set() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Remaining sleep for a cycle that started `elapsed` ago.
///
/// The elapsed time is taken modulo 60 seconds deliberately: repeated
/// cycles stay phase-aligned to wall-clock minute boundaries instead of
/// accumulating drift from variable send times. Never negative.
pub fn sleep_duration(interval_secs: u64, elapsed: Duration) -> Duration {
    let carried = elapsed.as_secs_f64() % 60.0;
    let remaining = interval_secs as f64 - carried;
    if remaining <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(remaining)
    }
}

/// Whether a session of the given age has outlived its configured maximum
/// lifetime and must be re-established.
pub fn refresh_due(age: Duration, refresh_hours: u64) -> bool {
    age >= Duration::from_secs(refresh_hours * 3600)
}

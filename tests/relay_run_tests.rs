mod common;

use anyhow::{bail, Result};
use common::{local_config, FakeTransport};
use skyrelay::relay::{CycleReport, RelaySession, SourceStrategy};
use skyrelay::shutdown::ShutdownFlag;
use skyrelay::transport::RemoteSink;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

/// Strategy double: records the iteration passed to every send, reports a
/// partially failed cycle, and sets the shutdown flag after `stop_after`
/// calls. `fail_at` makes that call error out instead.
struct ScriptedStrategy {
    iterations: Rc<RefCell<Vec<u64>>>,
    stop_after: usize,
    fail_at: Option<usize>,
    shutdown: ShutdownFlag,
}

impl SourceStrategy for ScriptedStrategy {
    fn send(&self, _sink: &dyn RemoteSink, iteration: u64) -> Result<CycleReport> {
        self.iterations.borrow_mut().push(iteration);
        let call = self.iterations.borrow().len();
        if self.fail_at == Some(call) {
            bail!("snapshot source unavailable (scripted)");
        }
        if call >= self.stop_after {
            self.shutdown.set();
        }
        Ok(CycleReport { sent: 2, failed: 1 })
    }
}

fn scripted(
    stop_after: usize,
    fail_at: Option<usize>,
    shutdown: &ShutdownFlag,
) -> (ScriptedStrategy, Rc<RefCell<Vec<u64>>>) {
    let iterations = Rc::new(RefCell::new(Vec::new()));
    let strategy = ScriptedStrategy {
        iterations: Rc::clone(&iterations),
        stop_after,
        fail_at,
        shutdown: shutdown.clone(),
    };
    (strategy, iterations)
}

fn session(strategy: ScriptedStrategy, shutdown: ShutdownFlag) -> RelaySession {
    let mut config = local_config(PathBuf::from("/run/dump1090-fa"));
    config.relay.send_interval_secs = 1;
    RelaySession::with_strategy(config, Box::new(strategy), shutdown)
}

#[test]
fn iteration_advances_once_per_cycle_despite_failed_items() {
    let shutdown = ShutdownFlag::new();
    let (strategy, iterations) = scripted(3, None, &shutdown);
    let mut session = session(strategy, shutdown);

    let transport = FakeTransport::new();
    let closed = transport.closed_handle();
    let summary = session.run_with(transport).expect("run completes");

    // Every cycle reported a failed item; the counter still advanced by
    // exactly one per cycle.
    assert_eq!(*iterations.borrow(), [0, 1, 2]);
    assert_eq!(summary.cycles, 3);
    assert!(summary.shutdown);
    assert!(closed.get());
}

#[test]
fn preset_shutdown_flag_skips_every_cycle() {
    let shutdown = ShutdownFlag::new();
    shutdown.set();
    let (strategy, iterations) = scripted(usize::MAX, None, &shutdown);
    let mut session = session(strategy, shutdown);

    let transport = FakeTransport::new();
    let closed = transport.closed_handle();
    let summary = session.run_with(transport).expect("run completes");

    assert!(iterations.borrow().is_empty());
    assert_eq!(summary.cycles, 0);
    assert!(summary.shutdown);
    assert!(closed.get());
}

#[test]
fn liveness_loss_ends_the_run() {
    let shutdown = ShutdownFlag::new();
    let (strategy, iterations) = scripted(usize::MAX, None, &shutdown);
    let mut session = session(strategy, shutdown);

    // One successful probe admits one cycle; the post-send probe fails.
    let transport = FakeTransport::new().live_for(1);
    let closed = transport.closed_handle();
    let summary = session.run_with(transport).expect("run completes");

    assert_eq!(*iterations.borrow(), [0]);
    assert_eq!(summary.cycles, 1);
    assert!(!summary.live);
    assert!(!summary.shutdown);
    assert!(closed.get());
}

#[test]
fn session_past_refresh_age_ends_the_run() {
    let shutdown = ShutdownFlag::new();
    let (strategy, iterations) = scripted(usize::MAX, None, &shutdown);
    let mut session = session(strategy, shutdown);

    // Default refresh horizon is 24 hours.
    let transport = FakeTransport::new().aged(Duration::from_secs(25 * 3600));
    let closed = transport.closed_handle();
    let summary = session.run_with(transport).expect("run completes");

    assert!(iterations.borrow().is_empty());
    assert_eq!(summary.cycles, 0);
    assert!(summary.refresh_due);
    assert!(!summary.shutdown);
    assert!(closed.get());
}

#[test]
fn cycle_error_aborts_the_run() {
    let shutdown = ShutdownFlag::new();
    let (strategy, iterations) = scripted(usize::MAX, Some(1), &shutdown);
    let mut session = session(strategy, shutdown);

    let transport = FakeTransport::new();
    let closed = transport.closed_handle();
    assert!(session.run_with(transport).is_err());

    assert_eq!(iterations.borrow().len(), 1);
    // The error path tears down by drop order, not through the explicit close.
    assert!(!closed.get());
}

#[test]
fn remote_directory_is_verified_before_the_first_cycle() {
    let shutdown = ShutdownFlag::new();
    shutdown.set();
    let (strategy, _) = scripted(usize::MAX, None, &shutdown);
    let mut session = session(strategy, shutdown);

    let transport = FakeTransport::new();
    let ensured = transport.ensured_handle();
    session.run_with(transport).expect("run completes");

    assert_eq!(*ensured.borrow(), ["/srv/piaware"]);
}

#[test]
fn skip_flag_leaves_the_remote_directory_alone() {
    let shutdown = ShutdownFlag::new();
    shutdown.set();
    let (strategy, _) = scripted(usize::MAX, None, &shutdown);
    let mut config = local_config(PathBuf::from("/run/dump1090-fa"));
    config.relay.skip_remote_dir_creation = true;
    let mut session = RelaySession::with_strategy(config, Box::new(strategy), shutdown);

    let transport = FakeTransport::new();
    let ensured = transport.ensured_handle();
    session.run_with(transport).expect("run completes");

    assert!(ensured.borrow().is_empty());
}

//! Strategy for a host that runs dump1090-fa itself: mirror its output
//! directory to the remote path.

use super::{CycleReport, SourceStrategy};
use crate::transport::{remote_join, RemoteSink};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error};

/// True for the large, slowly-changing history snapshots whose transfer is
/// throttled relative to the per-cycle files.
pub fn is_history_file(name: &str) -> bool {
    name.starts_with("history") && name.ends_with(".json")
}

pub struct LocalSourceStrategy {
    data_dir: PathBuf,
    remote_path: String,
    history_every: u64,
}

impl LocalSourceStrategy {
    pub fn new(data_dir: PathBuf, remote_path: String, history_every: u64) -> Self {
        Self {
            data_dir,
            remote_path,
            history_every,
        }
    }
}

impl SourceStrategy for LocalSourceStrategy {
    /// Copies every file in the data directory to the remote path, skipping
    /// history snapshots on non-throttled cycles. The listing is taken fresh
    /// each cycle. A per-file failure is logged and counted but never aborts
    /// the rest of the cycle.
    fn send(&self, sink: &dyn RemoteSink, iteration: u64) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let entries = fs::read_dir(&self.data_dir).with_context(|| {
            format!("Failed to list data directory {}", self.data_dir.display())
        })?;
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("Failed to read entry in {}", self.data_dir.display())
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_file() {
                debug!(cycle = iteration, "skipping non-file entry [{name}]");
                continue;
            }
            if is_history_file(&name) && iteration % self.history_every != 0 {
                debug!(
                    cycle = iteration,
                    "skipping history file [{name}] [{iteration}/{}]", self.history_every
                );
                continue;
            }

            let remote = remote_join(&self.remote_path, &name);
            match sink.put_file(&entry.path(), &remote) {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    error!(
                        cycle = iteration,
                        "failed to copy [{}] to [{remote}]: {err}",
                        entry.path().display()
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

//! Strategy for a companion PiAware host: poll its HTTP data endpoint and
//! republish the snapshots to the remote path.

use super::{CycleReport, SourceStrategy};
use crate::transport::{remote_join, RemoteSink};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// dump1090-fa's lighttpd serves `/data/` on this port.
const DATA_PORT: u16 = 8080;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches one snapshot file by name. `Ok(None)` means the endpoint
/// answered but had no payload for us (non-200); transport-level failures
/// are errors and take the whole cycle down.
pub trait SnapshotFetch {
    fn fetch(&self, file: &str) -> Result<Option<String>>;
}

/// Blocking HTTP fetcher against the PiAware host's data endpoint.
pub struct HttpFetch {
    host: String,
    client: reqwest::blocking::Client,
}

impl HttpFetch {
    pub fn new(host: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            host: host.to_string(),
            client,
        })
    }
}

impl SnapshotFetch for HttpFetch {
    fn fetch(&self, file: &str) -> Result<Option<String>> {
        // The millisecond timestamp defeats any intermediate caching.
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock before the epoch")?
            .as_millis();
        let url = format!("http://{}:{DATA_PORT}/data/{file}?_={stamp}", self.host);

        debug!("fetching {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("Failed to fetch {url}"))?;
        if response.status() != reqwest::StatusCode::OK {
            warn!("fetch of [{file}] returned {}", response.status());
            return Ok(None);
        }
        let body = response
            .text()
            .with_context(|| format!("Failed to read body of {url}"))?;
        Ok(Some(body))
    }
}

/// The slice of `receiver.json` the relay cares about: how many history
/// snapshot files the receiver currently keeps.
#[derive(Debug, Deserialize)]
struct ReceiverSnapshot {
    history: u64,
}

/// Parses the history-file count out of a receiver snapshot payload, if one
/// was fetched and parses at all.
pub fn history_count(receiver: Option<&str>) -> Option<u64> {
    receiver
        .and_then(|body| serde_json::from_str::<ReceiverSnapshot>(body).ok())
        .map(|snapshot| snapshot.history)
}

pub struct RemoteSourceStrategy {
    fetch: Box<dyn SnapshotFetch>,
    remote_path: String,
    history_every: u64,
}

impl RemoteSourceStrategy {
    pub fn new(piaware_host: &str, remote_path: String, history_every: u64) -> Result<Self> {
        Ok(Self::with_fetcher(
            Box::new(HttpFetch::new(piaware_host)?),
            remote_path,
            history_every,
        ))
    }

    /// Construction seam for tests: any fetcher, no HTTP client.
    pub fn with_fetcher(
        fetch: Box<dyn SnapshotFetch>,
        remote_path: String,
        history_every: u64,
    ) -> Self {
        Self {
            fetch,
            remote_path,
            history_every,
        }
    }

    /// Publishes one snapshot. An absent payload is written as an empty
    /// file so the remote side still sees a fresh mtime; a write failure is
    /// logged and counted without aborting the cycle.
    fn publish(
        &self,
        sink: &dyn RemoteSink,
        iteration: u64,
        name: &str,
        payload: Option<&str>,
        report: &mut CycleReport,
    ) {
        let remote = remote_join(&self.remote_path, name);
        if payload.is_none() {
            warn!(cycle = iteration, "no payload for [{name}], writing it empty");
        }
        let data = payload.unwrap_or_default().as_bytes().to_vec();
        match sink.write_file(&remote, &data) {
            Ok(()) => report.sent += 1,
            Err(err) => {
                error!(cycle = iteration, "failed to write [{remote}]: {err}");
                report.failed += 1;
            }
        }
    }
}

impl SourceStrategy for RemoteSourceStrategy {
    /// Republishes `receiver.json` and `aircraft.json` every cycle, and on
    /// throttled cycles fans out the history snapshots. The fan-out count
    /// comes from the `history` field of the receiver snapshot fetched this
    /// same cycle, so it tracks the upstream configuration over time.
    fn send(&self, sink: &dyn RemoteSink, iteration: u64) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let receiver = self.fetch.fetch("receiver.json")?;
        self.publish(sink, iteration, "receiver.json", receiver.as_deref(), &mut report);

        let aircraft = self.fetch.fetch("aircraft.json")?;
        self.publish(sink, iteration, "aircraft.json", aircraft.as_deref(), &mut report);

        if iteration % self.history_every == 0 {
            match history_count(receiver.as_deref()) {
                Some(count) => {
                    debug!(cycle = iteration, "updating {count} history snapshots");
                    for num in 0..count {
                        let name = format!("history_{num}.json");
                        let payload = self.fetch.fetch(&name)?;
                        self.publish(sink, iteration, &name, payload.as_deref(), &mut report);
                    }
                }
                None => warn!(
                    cycle = iteration,
                    "receiver snapshot unavailable, skipping history update this cycle"
                ),
            }
        }

        Ok(report)
    }
}

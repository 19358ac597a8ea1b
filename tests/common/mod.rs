#![allow(dead_code)]

use skyrelay::config::{RelayConfig, RelaySettings, Source};
use skyrelay::relay::remote::SnapshotFetch;
use skyrelay::transport::{RemoteSink, Transport, TransportError};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

/// Recording sink with injectable per-path failures.
#[derive(Default)]
pub struct FakeSink {
    pub puts: RefCell<Vec<(PathBuf, String)>>,
    pub writes: RefCell<Vec<(String, Vec<u8>)>>,
    fail_remote: RefCell<HashSet<String>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transfer targeting `remote` (full path or bare file
    /// name) fail with an injected I/O error.
    pub fn fail_on(&self, remote: &str) {
        self.fail_remote.borrow_mut().insert(remote.to_string());
    }

    pub fn put_names(&self) -> Vec<String> {
        self.puts
            .borrow()
            .iter()
            .map(|(_, remote)| file_name(remote))
            .collect()
    }

    pub fn write_names(&self) -> Vec<String> {
        self.writes
            .borrow()
            .iter()
            .map(|(remote, _)| file_name(remote))
            .collect()
    }

    pub fn written_body(&self, name: &str) -> Option<Vec<u8>> {
        self.writes
            .borrow()
            .iter()
            .find(|(remote, _)| file_name(remote) == name)
            .map(|(_, data)| data.clone())
    }

    fn should_fail(&self, remote: &str) -> bool {
        let failures = self.fail_remote.borrow();
        failures.contains(remote) || failures.contains(file_name(remote).as_str())
    }
}

fn file_name(remote: &str) -> String {
    remote.rsplit('/').next().unwrap_or(remote).to_string()
}

fn injected_error(remote: &str) -> TransportError {
    TransportError::RemoteWrite {
        path: remote.to_string(),
        source: std::io::Error::other("injected failure"),
    }
}

impl RemoteSink for FakeSink {
    fn put_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        if self.should_fail(remote) {
            return Err(injected_error(remote));
        }
        self.puts
            .borrow_mut()
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    fn write_file(&self, remote: &str, data: &[u8]) -> Result<(), TransportError> {
        if self.should_fail(remote) {
            return Err(injected_error(remote));
        }
        self.writes
            .borrow_mut()
            .push((remote.to_string(), data.to_vec()));
        Ok(())
    }
}

/// Scripted transport for driving the run loop without an SSH peer.
/// Liveness probes answer true a set number of times, session age is
/// fixed, and directory setup plus teardown are observable through shared
/// handles taken before the transport moves into the loop. Writes land in
/// the embedded [`FakeSink`].
pub struct FakeTransport {
    pub sink: FakeSink,
    live_probes: Cell<u64>,
    age: Cell<Duration>,
    ensured: Rc<RefCell<Vec<String>>>,
    closed: Rc<Cell<bool>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            sink: FakeSink::new(),
            live_probes: Cell::new(u64::MAX),
            age: Cell::new(Duration::ZERO),
            ensured: Rc::default(),
            closed: Rc::default(),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the next `probes` liveness checks with true, then false.
    pub fn live_for(self, probes: u64) -> Self {
        self.live_probes.set(probes);
        self
    }

    /// Reports a fixed session age instead of zero.
    pub fn aged(self, age: Duration) -> Self {
        self.age.set(age);
        self
    }

    pub fn ensured_handle(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.ensured)
    }

    pub fn closed_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.closed)
    }
}

impl RemoteSink for FakeTransport {
    fn put_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.sink.put_file(local, remote)
    }

    fn write_file(&self, remote: &str, data: &[u8]) -> Result<(), TransportError> {
        self.sink.write_file(remote, data)
    }
}

impl Transport for FakeTransport {
    fn ensure_remote_dir(&self, path: &str) {
        self.ensured.borrow_mut().push(path.to_string());
    }

    fn is_live(&self) -> bool {
        let left = self.live_probes.get();
        if left == 0 {
            return false;
        }
        self.live_probes.set(left - 1);
        true
    }

    fn age(&self) -> Duration {
        self.age.get()
    }

    fn close(self) {
        self.closed.set(true);
    }
}

/// Scripted snapshot fetcher: files not in `responses` come back absent,
/// files in `errors` fail at the transport level. Requests are recorded in
/// order; grab a handle with [`FakeFetch::requests_handle`] before the
/// fetcher is boxed into a strategy.
#[derive(Default)]
pub struct FakeFetch {
    pub responses: HashMap<String, String>,
    pub errors: HashSet<String>,
    requested: Rc<RefCell<Vec<String>>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, file: &str, body: &str) -> Self {
        self.responses.insert(file.to_string(), body.to_string());
        self
    }

    pub fn fail(mut self, file: &str) -> Self {
        self.errors.insert(file.to_string());
        self
    }

    pub fn requests_handle(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.requested)
    }
}

impl SnapshotFetch for FakeFetch {
    fn fetch(&self, file: &str) -> anyhow::Result<Option<String>> {
        self.requested.borrow_mut().push(file.to_string());
        if self.errors.contains(file) {
            anyhow::bail!("injected fetch failure for {file}");
        }
        Ok(self.responses.get(file).cloned())
    }
}

pub fn relay_settings() -> RelaySettings {
    RelaySettings {
        remote_host: "archive.example.net".to_string(),
        remote_user: "pi".to_string(),
        remote_key: PathBuf::from("/home/pi/.ssh/id_ed25519"),
        remote_path: "/srv/piaware".to_string(),
        ..RelaySettings::default()
    }
}

pub fn local_config(data_dir: PathBuf) -> RelayConfig {
    RelayConfig {
        relay: relay_settings(),
        source: Source::Local { data_dir },
    }
}

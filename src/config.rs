//! Configuration schema, defaults, layered loading, and persistence.
//!
//! Precedence: defaults < config file < environment (`SKYRELAY_` prefix,
//! `__` separates sections from keys, e.g. `SKYRELAY_RELAY__REMOTE_HOST`).

use anyhow::{bail, ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where dump1090-fa publishes its JSON output on a PiAware host. See the
/// lighttpd config shipped with dump1090-fa: `/data/` on port 8080 is an
/// alias for this directory.
pub const LOCAL_DATA_DIR: &str = "/run/dump1090-fa";

/// Anything 5 or above may trip stale-data notifications upstream.
pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 4;
pub const DEFAULT_HISTORY_EVERY: u64 = 240;
pub const DEFAULT_REFRESH_HOURS: u64 = 24;

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "skyrelay")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("skyrelay.toml"))
}

/// Settings shared by both relay flavours: where to send, how often, and
/// how aggressively to refresh the SSH session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub remote_host: String,
    pub remote_user: String,
    pub remote_key: PathBuf,
    pub remote_path: String,
    pub skip_remote_dir_creation: bool,
    pub send_interval_secs: u64,
    pub update_history_every: u64,
    pub refresh_session_hours: u64,
    pub log_level: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            remote_host: String::new(),
            remote_user: String::new(),
            remote_key: PathBuf::new(),
            remote_path: String::new(),
            skip_remote_dir_creation: false,
            send_interval_secs: DEFAULT_SEND_INTERVAL_SECS,
            update_history_every: DEFAULT_HISTORY_EVERY,
            refresh_session_hours: DEFAULT_REFRESH_HOURS,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSection {
    pub data_dir: PathBuf,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(LOCAL_DATA_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSection {
    pub piaware_host: String,
}

/// On-disk schema. Exactly one of `[local]` / `[remote]` must be present;
/// `resolve` enforces that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub relay: RelaySettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSection>,
}

/// Which side of the relay produces the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// dump1090-fa runs on this host; read its output directory.
    Local { data_dir: PathBuf },
    /// dump1090-fa runs on a companion host; poll its HTTP endpoint.
    Remote { piaware_host: String },
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub relay: RelaySettings,
    pub source: Source,
}

/// Reads the raw config file through all layers, without validating it.
/// Split from [`load_config`] so `run` can bring logging up on the
/// configured level before validation has a chance to fail.
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    Figment::new()
        .merge(Serialized::defaults(ConfigFile::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SKYRELAY_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Loads and validates the configuration at `path`.
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let file = load_config_file(path)?;
    resolve(file, Path::new(LOCAL_DATA_DIR).exists())
}

/// Validates a raw config file and resolves the data source.
///
/// `local_data_present` feeds the plausibility pre-flight: a `[remote]`
/// configuration on a host that has the well-known dump1090-fa output
/// directory is rejected, on the assumption that the operator meant to
/// configure a local relay. This is a heuristic and can false-positive on
/// hosts that happen to have a matching path for unrelated reasons.
pub fn resolve(file: ConfigFile, local_data_present: bool) -> Result<RelayConfig> {
    let relay = file.relay;

    ensure!(
        !relay.remote_host.is_empty(),
        "Invalid config: relay.remote_host must be set"
    );
    ensure!(
        !relay.remote_user.is_empty(),
        "Invalid config: relay.remote_user must be set"
    );
    ensure!(
        !relay.remote_key.as_os_str().is_empty(),
        "Invalid config: relay.remote_key must be set"
    );
    ensure!(
        !relay.remote_path.is_empty(),
        "Invalid config: relay.remote_path must be set"
    );
    ensure!(
        relay.send_interval_secs >= 1,
        "Invalid config: relay.send_interval_secs must be >= 1"
    );
    ensure!(
        relay.update_history_every >= 1,
        "Invalid config: relay.update_history_every must be >= 1"
    );
    ensure!(
        relay.refresh_session_hours >= 1,
        "Invalid config: relay.refresh_session_hours must be >= 1"
    );

    let source = match (file.local, file.remote) {
        (Some(local), None) => Source::Local {
            data_dir: local.data_dir,
        },
        (None, Some(remote)) => {
            if local_data_present {
                bail!(
                    "Invalid config: [remote] section supplied, but the local data \
                     directory ({LOCAL_DATA_DIR}) exists on this host"
                );
            }
            ensure!(
                !remote.piaware_host.is_empty(),
                "Invalid config: remote.piaware_host must be set"
            );
            Source::Remote {
                piaware_host: remote.piaware_host,
            }
        }
        (Some(_), Some(_)) => {
            bail!("Invalid config: both [local] and [remote] sections present; keep exactly one")
        }
        (None, None) => {
            bail!("Invalid config: neither [local] nor [remote] section present; add exactly one")
        }
    };

    Ok(RelayConfig { relay, source })
}

/// Serializes and atomically replaces the config file at `path`.
pub fn write_config(path: &Path, file: &ConfigFile) -> Result<()> {
    let contents =
        toml::to_string_pretty(file).context("Failed to serialize configuration")?;
    atomic_write(path, &contents)
}

/// Writes `contents` to a sibling temp file, syncs it, and renames it over
/// `path`, so a crash mid-write never leaves a truncated config behind.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
    }

    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write temporary file {}", tmp_path.display()))?;

    let file = fs::OpenOptions::new()
        .write(true)
        .open(&tmp_path)
        .with_context(|| format!("Failed to reopen temporary file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temporary file {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to replace config file {} from {}",
            path.display(),
            tmp_path.display()
        )
    })?;

    Ok(())
}

/// Hidden temp name in the target's directory, keyed by process id so
/// concurrent invocations do not trample each other's staging file.
fn temp_path_for(path: &Path) -> PathBuf {
    let base_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("config.toml");
    let tmp_name = format!(".{base_name}.{}.tmp", std::process::id());
    path.with_file_name(tmp_name)
}

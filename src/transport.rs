//! SSH/SFTP session lifecycle and the remote-write seam the relay
//! strategies send through.

use ssh2::{Session, Sftp};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

const SSH_PORT: u16 = 22;
/// Interval advertised to the peer for its own keepalives; our liveness
/// probe sends one explicitly regardless.
const KEEPALIVE_INTERVAL_SECS: u32 = 30;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("TCP connect to {host} failed: {source}")]
    Connect {
        host: String,
        source: std::io::Error,
    },
    #[error("SSH handshake with {host} failed: {source}")]
    Handshake { host: String, source: ssh2::Error },
    #[error("Public-key authentication for user {user} failed: {source}")]
    Auth { user: String, source: ssh2::Error },
    #[error("SSH/SFTP error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("Local file {path}: {source}")]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Remote write to {path}: {source}")]
    RemoteWrite {
        path: String,
        source: std::io::Error,
    },
}

/// Remote-write operations a relay strategy needs. `TransportSession` is the
/// real implementation; tests substitute a recording fake.
pub trait RemoteSink {
    /// Copies a local file to `remote`.
    fn put_file(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// Creates/truncates `remote` and writes `data` into it.
    fn write_file(&self, remote: &str, data: &[u8]) -> Result<(), TransportError>;
}

/// Everything the run loop drives on top of [`RemoteSink`]: remote
/// directory setup, the liveness probe, session age for the refresh check,
/// and teardown. `TransportSession` is the real implementation; tests run
/// the loop over a scripted fake.
pub trait Transport: RemoteSink {
    fn ensure_remote_dir(&self, path: &str);
    fn is_live(&self) -> bool;
    fn age(&self) -> Duration;
    fn close(self);
}

/// One live SSH session plus its SFTP channel.
///
/// Field order matters for the implicit teardown path: `sftp` is declared
/// before `sess` so the transfer channel drops before the outer session on
/// every early exit. [`Transport::close`] is the explicit, logged
/// variant for normal completion.
pub struct TransportSession {
    sftp: Sftp,
    sess: Session,
    host: String,
    connected_at: Instant,
}

impl TransportSession {
    /// Connects, authenticates with the private key, and opens the SFTP
    /// channel. Failures propagate; retry policy lives in the supervisor.
    pub fn open(host: &str, user: &str, key_path: &Path) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((host, SSH_PORT)).map_err(|source| {
            TransportError::Connect {
                host: host.to_string(),
                source,
            }
        })?;

        let mut sess = Session::new()?;
        sess.set_tcp_stream(tcp);
        sess.handshake().map_err(|source| TransportError::Handshake {
            host: host.to_string(),
            source,
        })?;

        sess.userauth_pubkey_file(user, None, key_path, None)
            .map_err(|source| TransportError::Auth {
                user: user.to_string(),
                source,
            })?;
        sess.set_keepalive(false, KEEPALIVE_INTERVAL_SECS);

        debug!("opening SFTP channel to remote host [{host}]");
        let sftp = sess.sftp()?;

        Ok(Self {
            sftp,
            sess,
            host: host.to_string(),
            connected_at: Instant::now(),
        })
    }

}

impl Transport for TransportSession {
    /// Best-effort: verify the remote directory exists, creating it if not.
    /// A creation failure (path exists as a file, permissions, a race) is
    /// logged and swallowed; sending proceeds regardless.
    fn ensure_remote_dir(&self, path: &str) {
        if self.sftp.stat(Path::new(path)).is_ok() {
            return;
        }
        warn!("remote directory [{path}] does not exist, creating it");
        if let Err(err) = self.sftp.mkdir(Path::new(path), 0o755) {
            error!("failed to create remote directory [{path}]: {err}");
        }
    }

    /// Probes the session with an SSH keepalive. A failed send means the
    /// peer closed the connection or the network dropped.
    fn is_live(&self) -> bool {
        self.sess.keepalive_send().is_ok()
    }

    /// Time since the session was established, for the refresh-due test.
    fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Closes the transfer channel, then disconnects the session.
    fn close(self) {
        let Self {
            mut sftp, sess, host, ..
        } = self;
        if let Err(err) = sftp.shutdown() {
            warn!("error shutting down SFTP channel to [{host}]: {err}");
        }
        debug!("closed SFTP channel to remote host [{host}]");
        if let Err(err) = sess.disconnect(None, "session complete", None) {
            warn!("error disconnecting from [{host}]: {err}");
        }
        debug!("closed SSH session to remote host [{host}]");
    }
}

impl RemoteSink for TransportSession {
    fn put_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let mut src =
            std::fs::File::open(local).map_err(|source| TransportError::LocalFile {
                path: local.to_path_buf(),
                source,
            })?;
        let len = src
            .metadata()
            .map_err(|source| TransportError::LocalFile {
                path: local.to_path_buf(),
                source,
            })?
            .len();

        let mut dst = self.sftp.create(Path::new(remote))?;
        copy_stream(&mut src, &mut dst, remote)?;
        debug!("copied {len} bytes from [{}] to [{remote}]", local.display());
        Ok(())
    }

    fn write_file(&self, remote: &str, data: &[u8]) -> Result<(), TransportError> {
        let mut dst = self.sftp.create(Path::new(remote))?;
        dst.write_all(data)
            .map_err(|source| TransportError::RemoteWrite {
                path: remote.to_string(),
                source,
            })?;
        debug!("wrote {} bytes to [{remote}]", data.len());
        Ok(())
    }
}

fn copy_stream(
    src: &mut impl Read,
    dst: &mut impl Write,
    remote: &str,
) -> Result<(), TransportError> {
    std::io::copy(src, dst).map_err(|source| TransportError::RemoteWrite {
        path: remote.to_string(),
        source,
    })?;
    Ok(())
}

/// Joins a remote base path and a file name with a single `/`.
pub fn remote_join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

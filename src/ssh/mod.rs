//! SSH/SFTP collaborator: trait seam for the pipeline plus the ssh2-backed
//! implementation.
//!
//! The whole API is intentionally blocking: libssh2 sessions are not Sync,
//! so the pipeline runs the entire remote-delivery phase inside one
//! `spawn_blocking` closure that owns the session.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::Session;

use crate::job::RemoteTarget;
use crate::{CourierError, Result};

/// Connection attempts stay short; stalled servers surface quickly.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-operation timeout once connected. Uploads are minutes-scale.
const TRANSFER_TIMEOUT_MS: u32 = 10 * 60 * 1000;

const UPLOAD_CHUNK: usize = 32 * 1024;

/// Opens sessions to a remote target.
pub trait RemoteDelivery: Send + Sync {
    fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

/// One open session. `close` is always called by the pipeline, also on
/// failure and cancellation paths.
pub trait RemoteSession: Send {
    /// Whether `path` exists as a directory and is writable.
    fn dir_writable(&mut self, path: &str) -> Result<bool>;

    /// Create `path` recursively.
    fn create_dir(&mut self, path: &str) -> Result<()>;

    /// Upload `local` to `remote`, reporting (transferred, total) bytes.
    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<()>;

    fn close(&mut self);
}

/// POSIX join of a remote folder and a file name.
pub fn remote_join(folder: &str, filename: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), filename)
}

fn probe_command(path: &str) -> String {
    format!("test -d \"{0}\" && test -w \"{0}\"", path)
}

fn mkdir_command(path: &str) -> String {
    format!("mkdir -p \"{}\"", path)
}

/// ssh2-backed factory.
#[derive(Debug, Default)]
pub struct Ssh2Delivery;

impl Ssh2Delivery {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteDelivery for Ssh2Delivery {
    fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let session = Ssh2Session::connect(target)?;
        Ok(Box::new(session))
    }
}

pub struct Ssh2Session {
    session: Session,
}

impl Ssh2Session {
    /// Connect and authenticate. Key file first when provided, password as
    /// fallback on key failure, agent when neither is supplied.
    pub fn connect(target: &RemoteTarget) -> Result<Self> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| CourierError::Connect(format!("cannot resolve {}: {}", target.host, e)))?
            .next()
            .ok_or_else(|| {
                CourierError::Connect(format!("no address found for {}", target.host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| CourierError::Connect(format!("cannot reach {}: {}", addr, e)))?;

        let mut session = Session::new()
            .map_err(|e| CourierError::Connect(format!("session setup failed: {}", e)))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| CourierError::Connect(format!("handshake failed: {}", e)))?;

        Self::authenticate(&session, target)?;

        session.set_timeout(TRANSFER_TIMEOUT_MS);
        Ok(Self { session })
    }

    fn authenticate(session: &Session, target: &RemoteTarget) -> Result<()> {
        let user = target.username.as_str();

        let auth_result = match (&target.key_file, &target.password) {
            (Some(key), password) if key.exists() => {
                match session.userauth_pubkey_file(user, None, key, None) {
                    Ok(()) => Ok(()),
                    Err(key_err) => match password {
                        Some(pw) => session.userauth_password(user, pw),
                        None => Err(key_err),
                    },
                }
            }
            (_, Some(pw)) => session.userauth_password(user, pw),
            (_, None) => session.userauth_agent(user),
        };

        auth_result
            .map_err(|e| CourierError::Connect(format!("authentication failed: {}", e)))?;

        if !session.authenticated() {
            return Err(CourierError::Connect(
                "authentication failed: no method accepted".into(),
            ));
        }
        Ok(())
    }

    /// Run a command, returning (stdout, stderr, exit code).
    pub fn run_command(&mut self, cmd: &str) -> std::result::Result<(String, String, i32), ssh2::Error> {
        let mut channel = self.session.channel_session()?;
        channel.exec(cmd)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).ok();
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close()?;
        let code = channel.exit_status()?;
        Ok((stdout, stderr, code))
    }

    /// List the entries of a remote directory.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let sftp = self
            .session
            .sftp()
            .map_err(|e| CourierError::RemoteFolder(format!("sftp unavailable: {}", e)))?;
        let entries = sftp
            .readdir(Path::new(path))
            .map_err(|e| CourierError::RemoteFolder(format!("cannot list {}: {}", path, e)))?;
        Ok(entries
            .into_iter()
            .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }
}

impl RemoteSession for Ssh2Session {
    fn dir_writable(&mut self, path: &str) -> Result<bool> {
        let (_, _, code) = self
            .run_command(&probe_command(path))
            .map_err(|e| CourierError::RemoteFolder(format!("probe failed: {}", e)))?;
        Ok(code == 0)
    }

    fn create_dir(&mut self, path: &str) -> Result<()> {
        let (_, stderr, code) = self
            .run_command(&mkdir_command(path))
            .map_err(|e| CourierError::RemoteFolder(format!("mkdir failed: {}", e)))?;
        if code != 0 {
            return Err(CourierError::RemoteFolder(format!(
                "cannot create {}: {}",
                path,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<()> {
        let total = fs_err::metadata(local)
            .map_err(|e| CourierError::Upload(e.to_string()))?
            .len();

        let sftp = self
            .session
            .sftp()
            .map_err(|e| CourierError::Upload(format!("sftp unavailable: {}", e)))?;

        let mut local_file =
            fs_err::File::open(local).map_err(|e| CourierError::Upload(e.to_string()))?;
        let mut remote_file = sftp
            .create(Path::new(remote))
            .map_err(|e| CourierError::Upload(format!("cannot create {}: {}", remote, e)))?;

        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut transferred = 0u64;
        loop {
            let n = local_file
                .read(&mut buf)
                .map_err(|e| CourierError::Upload(e.to_string()))?;
            if n == 0 {
                break;
            }
            remote_file
                .write_all(&buf[..n])
                .map_err(|e| CourierError::Upload(format!("write to {}: {}", remote, e)))?;
            transferred += n as u64;
            progress(transferred, total);
        }
        drop(remote_file);

        // Verify the remote size when we can; an unreadable stat is not a
        // failure.
        if let Ok(stat) = sftp.stat(Path::new(remote)) {
            if let Some(size) = stat.size {
                if size != total {
                    return Err(CourierError::Upload(format!(
                        "remote size mismatch: {} vs {} bytes",
                        size, total
                    )));
                }
            }
        }

        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "done", None) {
            tracing::warn!("error closing SSH session: {}", e);
        }
    }
}

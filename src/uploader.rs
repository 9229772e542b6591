use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};

use async_ssh2_lite::{AsyncSession, SessionConfiguration, TokioTcpStream};
use futures::{AsyncWriteExt, Stream};
use ssh2::{OpenFlags, OpenType};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const TRANSFER_BUF_SIZE: usize = 256 * 1024; // 256KB

/// Per-stage errors for an upload run. Every variant is fatal for the whole
/// job; a locally-missing file is an outcome ([`FileOutcome::MissingLocal`]),
/// not an error.
#[derive(Debug, Error)]
pub enum UploadError {
    /// TCP connect, address resolution, or SSH handshake failed.
    #[error("connection to {host}:{port} failed: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },

    /// The server rejected the password for this user.
    #[error("authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    /// The target remote directory is missing or not a directory.
    #[error("remote directory {dir} not usable: {message}")]
    RemoteDir { dir: String, message: String },

    /// A store operation failed mid-run.
    #[error("transfer of {name} failed: {message}")]
    Transfer { name: String, message: String },
}

/// Result of one file in a run's ordered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Uploaded { bytes: u64 },
    MissingLocal,
}

/// Ordered per-file outcome list for a completed run.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub outcomes: Vec<(String, FileOutcome)>,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FileOutcome::Uploaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FileOutcome::MissingLocal))
            .count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                FileOutcome::Uploaded { bytes } => *bytes,
                FileOutcome::MissingLocal => 0,
            })
            .sum()
    }
}

/// Progress events yielded while a run executes.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Uploading { name: String },
    Uploaded { name: String, bytes: u64 },
    Skipped { name: String },
    Done(UploadReport),
}

/// The session operations an upload run needs from the remote side. The
/// production implementation is [`SftpSession`]; tests drive runs against an
/// in-memory store.
pub trait RemoteStore {
    /// Verifies `dir` exists remotely and anchors subsequent stores there.
    async fn enter_dir(&mut self, dir: &str) -> Result<(), UploadError>;

    /// Stores `local` as `name` under the entered directory and returns the
    /// bytes written.
    async fn store_file(&mut self, name: &str, local: &Path) -> Result<u64, UploadError>;

    /// Releases the session. Best-effort; invoked on every exit path.
    async fn close(&mut self);
}

/// Runs one upload: enter the remote directory, then process `files` in list
/// order, storing each file that exists under `local_root` and skipping each
/// that does not. Yields progress events and finishes with
/// [`UploadEvent::Done`] carrying the ordered report.
///
/// Directory and transfer failures are fatal: the stream closes the session,
/// yields the error once, and ends. The session is also closed before the
/// final `Done` event, so every exit path releases it.
pub fn upload_files<'a, S: RemoteStore>(
    store: &'a mut S,
    remote_dir: &'a str,
    local_root: &'a Path,
    files: &'a [String],
) -> impl Stream<Item = Result<UploadEvent, UploadError>> + 'a {
    async_stream::try_stream! {
        if let Err(e) = store.enter_dir(remote_dir).await {
            store.close().await;
            Err(e)?;
        }

        let mut report = UploadReport::default();
        for name in files {
            if !local_root.join(name).exists() {
                report.outcomes.push((name.clone(), FileOutcome::MissingLocal));
                yield UploadEvent::Skipped { name: name.clone() };
                continue;
            }

            yield UploadEvent::Uploading { name: name.clone() };
            match store.store_file(name, &local_root.join(name)).await {
                Ok(bytes) => {
                    report
                        .outcomes
                        .push((name.clone(), FileOutcome::Uploaded { bytes }));
                    yield UploadEvent::Uploaded {
                        name: name.clone(),
                        bytes,
                    };
                }
                Err(e) => {
                    store.close().await;
                    Err(e)?;
                }
            }
        }

        store.close().await;
        yield UploadEvent::Done(report);
    }
}

/// SFTP-backed [`RemoteStore`]: an SSH-2 session with password
/// authentication, exclusively owned for the duration of one run.
pub struct SftpSession {
    session: AsyncSession<TokioTcpStream>,
    host: String,
    base: Option<PathBuf>,
}

impl SftpSession {
    /// Opens the TCP connection, performs the SSH handshake, and
    /// authenticates. Any failure here is fatal for the whole job.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<Self, UploadError> {
        let connect_err = |message: String| UploadError::Connect {
            host: host.to_string(),
            port,
            message,
        };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("no address resolved".to_string()))?;
        let stream = TokioTcpStream::connect(addr)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = AsyncSession::new(stream, SessionConfiguration::default())
            .map_err(|e| connect_err(e.to_string()))?;
        session
            .handshake()
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        log::debug!("ssh handshake complete for {host}:{port}");

        let auth_err = || UploadError::Auth {
            user: user.to_string(),
            host: host.to_string(),
        };
        session
            .userauth_password(user, password)
            .await
            .map_err(|_| auth_err())?;
        if !session.authenticated() {
            return Err(auth_err());
        }

        Ok(Self {
            session,
            host: host.to_string(),
            base: None,
        })
    }
}

impl RemoteStore for SftpSession {
    async fn enter_dir(&mut self, dir: &str) -> Result<(), UploadError> {
        let remote_dir_err = |message: String| UploadError::RemoteDir {
            dir: dir.to_string(),
            message,
        };

        let sftp = self
            .session
            .sftp()
            .await
            .map_err(|e| remote_dir_err(e.to_string()))?;
        let stat = sftp
            .stat(Path::new(dir))
            .await
            .map_err(|e| remote_dir_err(e.to_string()))?;
        if !stat.is_dir() {
            return Err(remote_dir_err("not a directory".to_string()));
        }

        log::debug!("entered remote directory {dir} on {}", self.host);
        self.base = Some(PathBuf::from(dir));
        Ok(())
    }

    async fn store_file(&mut self, name: &str, local: &Path) -> Result<u64, UploadError> {
        let transfer_err = |message: String| UploadError::Transfer {
            name: name.to_string(),
            message,
        };

        let remote = match &self.base {
            Some(base) => base.join(name),
            None => return Err(transfer_err("no remote directory entered".to_string())),
        };

        let sftp = self
            .session
            .sftp()
            .await
            .map_err(|e| transfer_err(e.to_string()))?;
        let mut local_file = File::open(local)
            .await
            .map_err(|e| transfer_err(e.to_string()))?;
        let mut remote_file = sftp
            .open_mode(
                &remote,
                OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .await
            .map_err(|e| transfer_err(e.to_string()))?;

        let mut buffer = vec![0u8; TRANSFER_BUF_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = local_file
                .read(&mut buffer)
                .await
                .map_err(|e| transfer_err(e.to_string()))?;
            if n == 0 {
                break;
            }
            let mut offset = 0;
            while offset < n {
                let nwritten = remote_file
                    .write(&buffer[offset..n])
                    .await
                    .map_err(|e| transfer_err(e.to_string()))?;
                if nwritten == 0 {
                    return Err(transfer_err("remote write returned 0 bytes".to_string()));
                }
                offset += nwritten;
            }
            written += n as u64;
        }

        remote_file
            .close()
            .await
            .map_err(|e| transfer_err(e.to_string()))?;

        // A store that "succeeded" but left a short file counts as a failed
        // transfer.
        let stat = sftp
            .stat(&remote)
            .await
            .map_err(|e| transfer_err(e.to_string()))?;
        if stat.size != Some(written) {
            return Err(transfer_err(format!(
                "remote size is {:?} after writing {written} bytes",
                stat.size
            )));
        }

        log::debug!("stored {} ({written} bytes)", remote.display());
        Ok(written)
    }

    async fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "closing session", None).await {
            log::warn!("ssh disconnect failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, pin_mut};

    #[derive(Default)]
    struct MockStore {
        entered: Vec<String>,
        stored: Vec<String>,
        closes: usize,
        fail_enter: bool,
        fail_store_on: Option<String>,
    }

    impl RemoteStore for MockStore {
        async fn enter_dir(&mut self, dir: &str) -> Result<(), UploadError> {
            if self.fail_enter {
                return Err(UploadError::RemoteDir {
                    dir: dir.to_string(),
                    message: "no such directory".to_string(),
                });
            }
            self.entered.push(dir.to_string());
            Ok(())
        }

        async fn store_file(&mut self, name: &str, _local: &Path) -> Result<u64, UploadError> {
            if self.fail_store_on.as_deref() == Some(name) {
                return Err(UploadError::Transfer {
                    name: name.to_string(),
                    message: "broken pipe".to_string(),
                });
            }
            self.stored.push(name.to_string());
            Ok(3)
        }

        async fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn file_names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn collect_events<S: RemoteStore>(
        store: &mut S,
        root: &Path,
        files: &[String],
    ) -> Vec<Result<UploadEvent, UploadError>> {
        let stream = upload_files(store, "/srv/site", root, files);
        pin_mut!(stream);
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn uploads_existing_and_skips_missing_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();

        let mut store = MockStore::default();
        let files = file_names(&["a.txt", "b.txt"]);
        let events = collect_events(&mut store, dir.path(), &files).await;

        assert_eq!(store.entered, vec!["/srv/site"]);
        assert_eq!(store.stored, vec!["a.txt"]);
        assert_eq!(store.closes, 1);

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], Ok(UploadEvent::Uploading { name }) if name == "a.txt"));
        assert!(
            matches!(&events[1], Ok(UploadEvent::Uploaded { name, bytes: 3 }) if name == "a.txt")
        );
        assert!(matches!(&events[2], Ok(UploadEvent::Skipped { name }) if name == "b.txt"));

        let Ok(UploadEvent::Done(report)) = &events[3] else {
            panic!("expected a final report");
        };
        assert_eq!(
            report.outcomes,
            vec![
                ("a.txt".to_string(), FileOutcome::Uploaded { bytes: 3 }),
                ("b.txt".to_string(), FileOutcome::MissingLocal),
            ]
        );
    }

    #[tokio::test]
    async fn zero_existing_files_performs_zero_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockStore::default();
        let files = file_names(&["a.txt", "b.txt"]);
        let events = collect_events(&mut store, dir.path(), &files).await;

        assert!(store.stored.is_empty());
        assert_eq!(store.closes, 1);
        assert!(events.iter().all(|e| e.is_ok()));

        let Some(Ok(UploadEvent::Done(report))) = events.last() else {
            panic!("expected a final report");
        };
        assert_eq!(report.uploaded(), 0);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.total_bytes(), 0);
    }

    #[tokio::test]
    async fn directory_failure_stops_before_any_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();

        let mut store = MockStore {
            fail_enter: true,
            ..MockStore::default()
        };
        let files = file_names(&["a.txt"]);
        let events = collect_events(&mut store, dir.path(), &files).await;

        assert!(store.stored.is_empty());
        assert_eq!(store.closes, 1);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Err(UploadError::RemoteDir { dir, .. }) if dir == "/srv/site"));
    }

    #[tokio::test]
    async fn transfer_failure_is_fatal_and_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let mut store = MockStore {
            fail_store_on: Some("b.txt".to_string()),
            ..MockStore::default()
        };
        let files = file_names(&["a.txt", "b.txt", "c.txt"]);
        let events = collect_events(&mut store, dir.path(), &files).await;

        // b.txt failed, c.txt was never attempted.
        assert_eq!(store.stored, vec!["a.txt"]);
        assert_eq!(store.closes, 1);

        let errors: Vec<&UploadError> = events.iter().filter_map(|e| e.as_ref().err()).collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], UploadError::Transfer { name, .. } if name == "b.txt"));
        assert!(events.last().unwrap().is_err());
    }

    #[tokio::test]
    async fn connect_fails_fast_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let Err(err) = SftpSession::connect("127.0.0.1", addr.port(), "deploy", "pw").await else {
            panic!("connect should fail");
        };
        assert!(
            matches!(err, UploadError::Connect { host, port, .. } if host == "127.0.0.1" && port == addr.port())
        );
    }

    #[tokio::test]
    async fn connect_reports_connect_error_when_handshake_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and immediately drop the socket so no SSH banner is sent.
            let _ = listener.accept().await;
        });

        let Err(err) = SftpSession::connect("127.0.0.1", addr.port(), "deploy", "pw").await else {
            panic!("connect should fail");
        };
        assert!(matches!(err, UploadError::Connect { .. }));
    }

    #[test]
    fn error_display_names_the_stage() {
        let err = UploadError::Auth {
            user: "deploy".into(),
            host: "sftp.example.com".into(),
        };
        assert_eq!(
            err.to_string(),
            "authentication failed for deploy@sftp.example.com"
        );

        let err = UploadError::RemoteDir {
            dir: "/var/www".into(),
            message: "no such file".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote directory /var/www not usable: no such file"
        );
    }
}

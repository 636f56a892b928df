// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded-retry transfer of logs and artifacts to an intermittently
//! available store.
//!
//! The lab's artifact server drops connections regularly, so every action
//! gets up to [`MAX_CONNECT_ATTEMPTS`] connection attempts with linear
//! backoff before it is abandoned. Transfers are fire-and-forget: artifact
//! upload must never fail a test, so exhausted retries and protocol errors
//! are logged and swallowed.
//!
//! The wire protocol stays behind the [`ArtifactStore`]/[`ArtifactSession`]
//! seam; this module only drives it.

use crate::{errors::SessionError, helpers};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::{thread, time::Duration};
use walkdir::WalkDir;

/// Connection timeout for directory-creation actions.
pub const DIR_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection timeout for file-upload actions.
pub const FILE_CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum number of connection attempts per action.
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// drwxrwxr-x for created directories.
const DIR_MODE: u32 = 0o775;
/// -rw-r--r-- for uploaded files.
const FILE_MODE: u32 = 0o644;

/// A factory for sessions against the remote artifact store.
pub trait ArtifactStore {
    /// The session type produced by a successful connect.
    type Session: ArtifactSession;

    /// Establishes one session within `timeout`.
    fn connect(&self, timeout: Duration) -> Result<Self::Session, ConnectError<Self::Session>>;
}

/// A failed connection attempt.
///
/// A half-open session from the failed attempt, if any, is handed back so
/// the retry loop can tear it down before trying again.
pub struct ConnectError<S> {
    /// What went wrong.
    pub error: SessionError,
    /// The partially established session, if one exists.
    pub partial: Option<S>,
}

impl<S> ConnectError<S> {
    /// A connection failure with no partial session.
    pub fn new(error: SessionError) -> Self {
        Self {
            error,
            partial: None,
        }
    }

    /// A connection failure that left a half-open session behind.
    pub fn with_partial(error: SessionError, partial: S) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

/// One established session. All methods may fail with protocol-phase
/// errors, which abort the current operation without retry.
pub trait ArtifactSession {
    /// Lists the entries of `dir` as full remote paths.
    fn list_dir(&mut self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SessionError>;

    /// Creates one directory.
    fn make_dir(&mut self, dir: &Utf8Path) -> Result<(), SessionError>;

    /// Sets the permission mode of a remote path.
    fn set_mode(&mut self, path: &Utf8Path, mode: u32) -> Result<(), SessionError>;

    /// Uploads `local` to `remote`.
    fn put_file(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), SessionError>;

    /// Graceful teardown.
    fn quit(&mut self) -> Result<(), SessionError>;

    /// Forcible close, used when `quit` fails.
    fn abort(&mut self);
}

/// One transferable action.
#[derive(Clone, Debug)]
pub enum TransferAction {
    /// Create `remote_dir` and any missing parents below the store root.
    EnsureDirs {
        /// The directory to create.
        remote_dir: Utf8PathBuf,
    },
    /// Upload `local` to `remote`, disambiguating the destination name if
    /// it already exists.
    UploadFile {
        /// The local source file.
        local: Utf8PathBuf,
        /// The full remote destination path.
        remote: Utf8PathBuf,
    },
}

impl TransferAction {
    fn connect_timeout(&self) -> Duration {
        match self {
            TransferAction::EnsureDirs { .. } => DIR_CONNECT_TIMEOUT,
            TransferAction::UploadFile { .. } => FILE_CONNECT_TIMEOUT,
        }
    }
}

/// Drives [`TransferAction`]s against an [`ArtifactStore`] with bounded
/// retries and linear backoff.
#[derive(Debug)]
pub struct RetryingTransfer<S> {
    store: S,
    remote_root: Utf8PathBuf,
    backoff: Backoff,
}

impl<S: ArtifactStore> RetryingTransfer<S> {
    /// Creates a transfer rooted at `remote_root` on the store.
    pub fn new(store: S, remote_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            store,
            remote_root: remote_root.into(),
            backoff: Backoff::Wall,
        }
    }

    #[cfg(test)]
    fn with_backoff(store: S, remote_root: impl Into<Utf8PathBuf>, backoff: Backoff) -> Self {
        Self {
            store,
            remote_root: remote_root.into(),
            backoff,
        }
    }

    /// Runs one action. Returns whether the action completed; all failures
    /// are logged rather than raised.
    pub fn run(&self, action: &TransferAction) -> bool {
        let Some(mut session) = self.connect_with_retry(action.connect_timeout()) else {
            return false;
        };

        let outcome = match action {
            TransferAction::EnsureDirs { remote_dir } => self.ensure_dirs(&mut session, remote_dir),
            TransferAction::UploadFile { local, remote } => {
                self.upload_file(&mut session, local, remote)
            }
        };
        let completed = match outcome {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!("artifact transfer aborted: {error}");
                false
            }
        };

        if let Err(error) = session.quit() {
            tracing::warn!("cannot close the artifact store session: {error}");
            session.abort();
        }
        completed
    }

    /// Creates `<root>/<task_id>` on the store for a test run's artifacts.
    pub fn ensure_run_folder(&self, task_id: i64) -> bool {
        self.run(&TransferAction::EnsureDirs {
            remote_dir: self.remote_root.join(task_id.to_string()),
        })
    }

    /// Mirrors a local file or directory tree to
    /// `<root>/<task_id>/<destination>/…`, escaping spaces and parens in
    /// remote path components.
    ///
    /// With `recursive` false, only the top level of a directory is
    /// uploaded. Returns whether every action completed.
    pub fn upload_tree(
        &self,
        source: &Utf8Path,
        task_id: i64,
        destination: &str,
        recursive: bool,
    ) -> bool {
        if !source.exists() {
            tracing::warn!("artifacts were not uploaded, the path `{source}` does not exist");
            return false;
        }

        let mut base = self.remote_root.join(task_id.to_string());
        if !destination.is_empty() {
            base = base.join(destination);
        }

        if !source.is_dir() {
            let Some(file_name) = source.file_name() else {
                tracing::warn!("cannot upload `{source}`: no file name");
                return false;
            };
            return self.run(&TransferAction::EnsureDirs {
                remote_dir: base.clone(),
            }) && self.run(&TransferAction::UploadFile {
                local: source.to_owned(),
                remote: base.join(helpers::escape_remote_component(file_name)),
            });
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut all_completed = true;
        for entry in WalkDir::new(source).max_depth(max_depth) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!("cannot walk `{source}`: {error}");
                    all_completed = false;
                    continue;
                }
            };
            let Some(local) = Utf8Path::from_path(entry.path()) else {
                tracing::warn!("skipping non-UTF-8 path under `{source}`");
                all_completed = false;
                continue;
            };
            let relative = local.strip_prefix(source).unwrap_or(local);
            let remote = relative
                .iter()
                .fold(base.clone(), |acc, component| {
                    acc.join(helpers::escape_remote_component(component))
                });

            let completed = if entry.file_type().is_dir() {
                self.run(&TransferAction::EnsureDirs { remote_dir: remote })
            } else {
                self.run(&TransferAction::UploadFile {
                    local: local.to_owned(),
                    remote,
                })
            };
            all_completed &= completed;
        }
        all_completed
    }

    fn connect_with_retry(&self, timeout: Duration) -> Option<S::Session> {
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self.store.connect(timeout) {
                Ok(session) => return Some(session),
                Err(ConnectError { error, partial }) => {
                    tracing::warn!(attempt, "cannot connect to the artifact store: {error}");
                    if let Some(mut partial) = partial {
                        if let Err(error) = partial.quit() {
                            tracing::warn!("cannot close a half-open session: {error}");
                            partial.abort();
                        }
                    }
                }
            }
            if attempt < MAX_CONNECT_ATTEMPTS {
                self.backoff.sleep(attempt);
            }
        }
        tracing::warn!(
            "cannot connect to the artifact store in {MAX_CONNECT_ATTEMPTS} attempts, giving up"
        );
        None
    }

    fn ensure_dirs(
        &self,
        session: &mut S::Session,
        remote_dir: &Utf8Path,
    ) -> Result<(), SessionError> {
        let relative = remote_dir
            .strip_prefix(&self.remote_root)
            .unwrap_or(remote_dir);
        let mut path = self.remote_root.clone();
        for segment in relative.iter() {
            path = path.join(segment);
            let parent = path
                .parent()
                .map(Utf8Path::to_owned)
                .unwrap_or_else(|| self.remote_root.clone());
            if !session.list_dir(&parent)?.contains(&path) {
                session.make_dir(&path)?;
                session.set_mode(&path, DIR_MODE)?;
            }
        }
        Ok(())
    }

    fn upload_file(
        &self,
        session: &mut S::Session,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> Result<(), SessionError> {
        if !local.exists() {
            tracing::warn!("cannot upload, the source `{local}` does not exist");
            return Ok(());
        }

        let mut destination = remote.to_owned();
        if let Some(parent) = remote.parent() {
            if session.list_dir(parent)?.contains(&destination) {
                destination = Utf8PathBuf::from(format!(
                    "{destination}.{}",
                    helpers::folder_timestamp(Local::now())
                ));
            }
        }
        session.put_file(local, &destination)?;
        session.set_mode(&destination, FILE_MODE)?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum Backoff {
    /// Sleep on the calling thread. Acceptable because transfers run from
    /// teardown and log paths, never latency-critical test logic.
    Wall,
    /// Record requested sleeps instead of performing them.
    #[cfg(test)]
    Recorded(std::sync::Arc<std::sync::Mutex<Vec<Duration>>>),
}

impl Backoff {
    fn sleep(&self, attempt: u32) {
        let delay = Duration::from_secs(u64::from(attempt));
        match self {
            Backoff::Wall => thread::sleep(delay),
            #[cfg(test)]
            Backoff::Recorded(delays) => delays.lock().unwrap().push(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// What the fake server saw, shared across sessions.
    #[derive(Debug, Default)]
    struct ServerLog {
        connect_attempts: u32,
        existing: Vec<Utf8PathBuf>,
        made_dirs: Vec<Utf8PathBuf>,
        modes: Vec<(Utf8PathBuf, u32)>,
        uploads: Vec<(Utf8PathBuf, Utf8PathBuf)>,
        quits: u32,
    }

    #[derive(Clone)]
    struct FakeStore {
        log: Arc<Mutex<ServerLog>>,
        fail_connects: u32,
        fail_protocol: bool,
    }

    impl FakeStore {
        fn new(fail_connects: u32) -> Self {
            Self {
                log: Arc::new(Mutex::new(ServerLog::default())),
                fail_connects,
                fail_protocol: false,
            }
        }

        fn with_existing(self, existing: Vec<Utf8PathBuf>) -> Self {
            self.log.lock().unwrap().existing = existing;
            self
        }
    }

    struct FakeSession {
        log: Arc<Mutex<ServerLog>>,
        fail_protocol: bool,
    }

    impl ArtifactStore for FakeStore {
        type Session = FakeSession;

        fn connect(&self, _timeout: Duration) -> Result<FakeSession, ConnectError<FakeSession>> {
            let mut log = self.log.lock().unwrap();
            log.connect_attempts += 1;
            if log.connect_attempts <= self.fail_connects {
                return Err(ConnectError::new(SessionError::new("connection timed out")));
            }
            Ok(FakeSession {
                log: Arc::clone(&self.log),
                fail_protocol: self.fail_protocol,
            })
        }
    }

    impl ArtifactSession for FakeSession {
        fn list_dir(&mut self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SessionError> {
            let log = self.log.lock().unwrap();
            Ok(log
                .existing
                .iter()
                .chain(log.made_dirs.iter())
                .filter(|path| path.parent() == Some(dir))
                .cloned()
                .collect())
        }

        fn make_dir(&mut self, dir: &Utf8Path) -> Result<(), SessionError> {
            if self.fail_protocol {
                return Err(SessionError::new("permission denied"));
            }
            self.log.lock().unwrap().made_dirs.push(dir.to_owned());
            Ok(())
        }

        fn set_mode(&mut self, path: &Utf8Path, mode: u32) -> Result<(), SessionError> {
            self.log.lock().unwrap().modes.push((path.to_owned(), mode));
            Ok(())
        }

        fn put_file(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), SessionError> {
            self.log
                .lock()
                .unwrap()
                .uploads
                .push((local.to_owned(), remote.to_owned()));
            Ok(())
        }

        fn quit(&mut self) -> Result<(), SessionError> {
            self.log.lock().unwrap().quits += 1;
            Ok(())
        }

        fn abort(&mut self) {}
    }

    fn recorded_transfer(store: FakeStore) -> (RetryingTransfer<FakeStore>, Arc<Mutex<Vec<Duration>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let transfer = RetryingTransfer::with_backoff(
            store,
            "/logs",
            Backoff::Recorded(Arc::clone(&delays)),
        );
        (transfer, delays)
    }

    fn seconds(delays: &Arc<Mutex<Vec<Duration>>>) -> Vec<u64> {
        delays.lock().unwrap().iter().map(Duration::as_secs).collect()
    }

    #[test]
    fn succeeds_after_transient_connect_failures() {
        let store = FakeStore::new(3);
        let log = Arc::clone(&store.log);
        let (transfer, delays) = recorded_transfer(store);

        let completed = transfer.ensure_run_folder(321);
        assert!(completed);
        // Three failures cost backoffs of 1s, 2s and 3s; the fourth attempt
        // connects.
        assert_eq!(seconds(&delays), vec![1, 2, 3]);
        let log = log.lock().unwrap();
        assert_eq!(log.connect_attempts, 4);
        assert_eq!(log.made_dirs, vec![Utf8PathBuf::from("/logs/321")]);
        assert_eq!(log.quits, 1);
    }

    #[test]
    fn gives_up_after_five_connect_attempts() {
        let store = FakeStore::new(u32::MAX);
        let log = Arc::clone(&store.log);
        let (transfer, delays) = recorded_transfer(store);

        let completed = transfer.ensure_run_folder(321);
        assert!(!completed);
        assert_eq!(seconds(&delays), vec![1, 2, 3, 4]);
        assert_eq!(log.lock().unwrap().connect_attempts, MAX_CONNECT_ATTEMPTS);
    }

    #[test]
    fn creates_missing_segments_recursively_with_mode_775() {
        let store =
            FakeStore::new(0).with_existing(vec![Utf8PathBuf::from("/logs/321")]);
        let log = Arc::clone(&store.log);
        let (transfer, _) = recorded_transfer(store);

        let completed = transfer.run(&TransferAction::EnsureDirs {
            remote_dir: Utf8PathBuf::from("/logs/321/run_output/syslogs"),
        });
        assert!(completed);
        let log = log.lock().unwrap();
        // `/logs/321` already exists and is skipped.
        assert_eq!(
            log.made_dirs,
            vec![
                Utf8PathBuf::from("/logs/321/run_output"),
                Utf8PathBuf::from("/logs/321/run_output/syslogs"),
            ]
        );
        assert!(log.modes.iter().all(|(_, mode)| *mode == DIR_MODE));
        assert_eq!(log.modes.len(), 2);
    }

    #[test]
    fn disambiguates_existing_destination_with_timestamp() {
        let dir = camino_tempfile::Utf8TempDir::new().unwrap();
        let local = dir.path().join("report.txt");
        fs_err::write(&local, "contents").unwrap();

        let remote = Utf8PathBuf::from("/logs/321/report.txt");
        let store = FakeStore::new(0).with_existing(vec![remote.clone()]);
        let log = Arc::clone(&store.log);
        let (transfer, _) = recorded_transfer(store);

        let completed = transfer.run(&TransferAction::UploadFile {
            local: local.clone(),
            remote: remote.clone(),
        });
        assert!(completed);
        let log = log.lock().unwrap();
        let (uploaded_local, uploaded_remote) = &log.uploads[0];
        assert_eq!(uploaded_local, &local);
        assert_ne!(uploaded_remote, &remote, "existing name must be suffixed");
        assert!(uploaded_remote.as_str().starts_with(remote.as_str()));
        assert_eq!(log.modes[0].1, FILE_MODE);
    }

    #[test]
    fn protocol_failure_aborts_without_retry_but_closes_session() {
        let mut store = FakeStore::new(0);
        store.fail_protocol = true;
        let log = Arc::clone(&store.log);
        let (transfer, delays) = recorded_transfer(store);

        let completed = transfer.ensure_run_folder(99);
        assert!(!completed);
        let log = log.lock().unwrap();
        assert_eq!(log.connect_attempts, 1, "protocol errors are not retried");
        assert_eq!(log.quits, 1, "session closed even on failure");
        assert!(seconds(&delays).is_empty());
    }

    #[test]
    fn missing_local_source_is_contained() {
        let store = FakeStore::new(0);
        let log = Arc::clone(&store.log);
        let (transfer, _) = recorded_transfer(store);

        let completed = transfer.run(&TransferAction::UploadFile {
            local: Utf8PathBuf::from("/definitely/not/here.txt"),
            remote: Utf8PathBuf::from("/logs/1/here.txt"),
        });
        assert!(completed, "a missing source is logged, not raised");
        assert!(log.lock().unwrap().uploads.is_empty());
    }

    #[test]
    fn upload_tree_mirrors_directories_and_escapes_names() {
        let dir = camino_tempfile::Utf8TempDir::new().unwrap();
        let source = dir.path().join("run (1)");
        fs_err::create_dir(&source).unwrap();
        fs_err::write(source.join("log one.txt"), "a").unwrap();

        let store = FakeStore::new(0);
        let log = Arc::clone(&store.log);
        let (transfer, _) = recorded_transfer(store);

        let completed = transfer.upload_tree(&source, 55, "artifacts", true);
        assert!(completed);
        let log = log.lock().unwrap();
        assert!(
            log.made_dirs
                .contains(&Utf8PathBuf::from("/logs/55/artifacts")),
            "tree root mirrored: {:?}",
            log.made_dirs
        );
        let uploaded: Vec<_> = log.uploads.iter().map(|(_, remote)| remote).collect();
        assert_eq!(uploaded.len(), 1);
        assert!(
            uploaded[0].as_str().ends_with("log\\ one.txt"),
            "spaces escaped: {}",
            uploaded[0]
        );
    }
}

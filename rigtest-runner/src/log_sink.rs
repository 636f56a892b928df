// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test logging: a local text log, console fan-out, and an optional
//! asynchronous remote store.
//!
//! Every test run owns exactly one [`LogSink`]. Records are written to an
//! append-only text file and echoed to stdout; when a remote store is
//! configured, each record is additionally handed to a single background
//! upload thread through an ordered channel. A remote failure never blocks
//! or corrupts local logging: failed entries are preserved in a
//! [`SpillQueue`]-backed dump file next to the log.
//!
//! Device resources log through a [`LogProxy`], which prefixes every message
//! with a fixed `[device,role,resource]` scope so their lines stay
//! attributable in the shared log.

use crate::{
    errors::{RemoteLogError, StorageError},
    helpers,
    spill_queue::SpillQueue,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use debug_ignore::DebugIgnore;
use fs_err as fs;
use serde_json::Value;
use std::{
    fmt,
    io::Write,
    sync::{Arc, Mutex},
    thread,
};

/// Default file name for the per-test log inside the log directory.
pub const LOG_FILE_NAME: &str = "test_case_log.txt";

/// File name of the dump that preserves records the remote store rejected.
pub const REMOTE_DUMP_FILE_NAME: &str = "remote_store_dump.txt";

/// How many rejected records stay in memory before spilling to the dump file.
const REMOTE_DUMP_MAX_PENDING: usize = 64;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Severity of one log record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    /// Diagnostic chatter.
    Debug,
    /// Regular progress messages.
    Info,
    /// Something unexpected that the test can survive.
    Warn,
    /// A failure worth investigating.
    Error,
    /// The rig or device is in serious trouble.
    Critical,
}

impl Severity {
    /// The upper-case form used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log message of arbitrary shape.
///
/// Normalization to a printable line never fails the caller: structured
/// payloads that cannot be rendered as JSON degrade to their debug form, and
/// rendering problems are reported on stdout only.
#[derive(Clone, Debug)]
pub enum LogPayload {
    /// Plain text.
    Text(String),
    /// A structured value, rendered as JSON.
    Structured(Value),
    /// A sequence of strings, rendered comma-separated.
    List(Vec<String>),
}

impl LogPayload {
    fn normalize(self) -> String {
        match self {
            LogPayload::Text(text) => text,
            LogPayload::Structured(value) => match serde_json::to_string(&value) {
                Ok(rendered) => rendered,
                Err(error) => {
                    println!("***Error: cannot render a structured log message: {error}");
                    format!("{value:?}")
                }
            },
            LogPayload::List(items) => items.join(","),
        }
    }
}

impl From<&str> for LogPayload {
    fn from(text: &str) -> Self {
        LogPayload::Text(text.to_owned())
    }
}

impl From<String> for LogPayload {
    fn from(text: String) -> Self {
        LogPayload::Text(text)
    }
}

impl From<Value> for LogPayload {
    fn from(value: Value) -> Self {
        LogPayload::Structured(value)
    }
}

impl From<Vec<String>> for LogPayload {
    fn from(items: Vec<String>) -> Self {
        LogPayload::List(items)
    }
}

/// One record queued for remote persistence.
#[derive(Clone, Debug)]
pub struct RemoteLogEntry {
    /// When the record was logged.
    pub timestamp: DateTime<Local>,
    /// The result row the record belongs to.
    pub result_id: i64,
    /// Record severity.
    pub severity: Severity,
    /// The normalized message text.
    pub message: String,
}

impl RemoteLogEntry {
    fn as_dump_line(&self) -> String {
        format!(
            "{} - {} - {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.severity,
            self.message
        )
    }
}

/// A remote persistence backend for log entries.
///
/// Entries arrive on a single background thread in submission order. Errors
/// are contained by the sink and never reach the logging caller.
pub trait RemoteLogStore: Send {
    /// Persists one entry.
    fn upload_entry(&mut self, entry: &RemoteLogEntry) -> Result<(), RemoteLogError>;
}

/// Options for constructing a [`LogSink`].
#[derive(Debug, Default)]
pub struct LogSinkBuilder {
    root: Option<Utf8PathBuf>,
    label: String,
    file_name: Option<String>,
    result_id: Option<i64>,
    remote: DebugIgnore<Option<Box<dyn RemoteLogStore>>>,
}

impl LogSinkBuilder {
    /// Creates a builder with the given folder label.
    ///
    /// Filesystem-unsafe characters in the label (`:`, `(`, `)`, space) are
    /// replaced with `_`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Sets the root under which the log directory is created. Defaults to
    /// the system temp directory.
    pub fn root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Overrides the log file name inside the log directory.
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Sets the result id used as a stable directory suffix. Without one, a
    /// timestamp keeps the directory unique.
    pub fn result_id(mut self, result_id: i64) -> Self {
        self.result_id = Some(result_id);
        self
    }

    /// Attaches a remote store. Uploads only start when a result id was
    /// also supplied.
    pub fn remote_store(mut self, store: Box<dyn RemoteLogStore>) -> Self {
        self.remote = DebugIgnore(Some(store));
        self
    }

    /// Creates the log directory and file and starts the upload worker.
    pub fn build(self) -> Result<LogSink, StorageError> {
        let root = match self.root {
            Some(root) => root,
            None => Utf8PathBuf::try_from(std::env::temp_dir())
                .map_err(StorageError::NonUtf8TempDir)?,
        };

        let label = helpers::sanitize_component(&self.label);
        let suffix = match self.result_id {
            Some(result_id) => result_id.to_string(),
            None => helpers::folder_timestamp(Local::now()),
        };
        let dir_name = if label.is_empty() {
            suffix
        } else {
            format!("{label}.{suffix}")
        };

        let log_dir = root.join(dir_name);
        fs::create_dir_all(&log_dir).map_err(|error| StorageError::CreateDir {
            path: log_dir.clone(),
            error,
        })?;

        let file_name = self
            .file_name
            .map(|name| helpers::sanitize_component(&name))
            .unwrap_or_else(|| LOG_FILE_NAME.to_owned());
        let log_file = log_dir.join(file_name);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|error| StorageError::OpenFile {
                path: log_file.clone(),
                error,
            })?;

        let remote = match (self.result_id, self.remote.0) {
            (Some(_), Some(store)) => {
                let dump = SpillQueue::new(
                    log_dir.join(REMOTE_DUMP_FILE_NAME),
                    REMOTE_DUMP_MAX_PENDING,
                );
                Some(RemoteWorker::spawn(store, dump))
            }
            _ => None,
        };

        Ok(LogSink {
            inner: Arc::new(SinkInner {
                log_dir,
                log_file,
                result_id: self.result_id,
                file: Mutex::new(Some(file)),
                remote: Mutex::new(remote),
            }),
        })
    }
}

/// Fans out log records to a local file, the console, and an optional
/// remote store.
///
/// Cheap to clone; all clones share one log file and one upload worker.
#[derive(Clone, Debug)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    log_dir: Utf8PathBuf,
    log_file: Utf8PathBuf,
    result_id: Option<i64>,
    file: Mutex<Option<fs::File>>,
    remote: Mutex<Option<RemoteWorker>>,
}

impl LogSink {
    /// Starts building a sink with the given folder label.
    pub fn builder(label: impl Into<String>) -> LogSinkBuilder {
        LogSinkBuilder::new(label)
    }

    /// The directory holding the log file and any diagnostic artifacts.
    pub fn log_dir(&self) -> &Utf8Path {
        &self.inner.log_dir
    }

    /// The full path of the local log file.
    pub fn log_file(&self) -> &Utf8Path {
        &self.inner.log_file
    }

    /// Logs one record at the given severity.
    ///
    /// Never raises: write problems are reported on stdout and the record
    /// is dropped from the affected destination only.
    pub fn log(&self, severity: Severity, payload: impl Into<LogPayload>) {
        let timestamp = Local::now();
        let message = payload.into().normalize();
        let line = format!(
            "{} - {} - {}",
            timestamp.format(TIMESTAMP_FORMAT),
            severity,
            message
        );
        println!("{line}");

        match self.inner.file.lock() {
            Ok(mut guard) => {
                if let Some(file) = guard.as_mut() {
                    if let Err(error) = writeln!(file, "{line}") {
                        println!(
                            "***Error: cannot write to the log file `{}`: {error}",
                            self.inner.log_file
                        );
                    }
                }
            }
            Err(_) => {
                println!(
                    "***Error: log file handle for `{}` is poisoned, skipping the record",
                    self.inner.log_file
                );
            }
        }

        if let (Some(result_id), Ok(guard)) = (self.inner.result_id, self.inner.remote.lock()) {
            if let Some(worker) = guard.as_ref() {
                let entry = RemoteLogEntry {
                    timestamp,
                    result_id,
                    severity,
                    message,
                };
                if worker.sender.send(entry).is_err() {
                    println!("***Error: the remote log worker is gone, skipping the record");
                }
            }
        }
    }

    /// Logs at [`Severity::Debug`].
    pub fn debug(&self, payload: impl Into<LogPayload>) {
        self.log(Severity::Debug, payload);
    }

    /// Logs at [`Severity::Info`].
    pub fn info(&self, payload: impl Into<LogPayload>) {
        self.log(Severity::Info, payload);
    }

    /// Logs at [`Severity::Warn`].
    pub fn warn(&self, payload: impl Into<LogPayload>) {
        self.log(Severity::Warn, payload);
    }

    /// Logs at [`Severity::Error`].
    pub fn error(&self, payload: impl Into<LogPayload>) {
        self.log(Severity::Error, payload);
    }

    /// Logs at [`Severity::Critical`].
    pub fn critical(&self, payload: impl Into<LogPayload>) {
        self.log(Severity::Critical, payload);
    }

    /// Stops the remote upload worker, blocking until every queued entry
    /// has been attempted.
    ///
    /// Local logging keeps working afterwards; further records simply stay
    /// on this box. Calling `flush` again is a no-op.
    pub fn flush(&self) {
        let worker = match self.inner.remote.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            worker.join();
        }
    }

    /// Scoped teardown: drains the upload worker and closes the log file.
    ///
    /// A sink that was already closed reports success; any other close
    /// error is surfaced.
    pub fn close(&self) -> Result<(), StorageError> {
        self.flush();
        let file = match self.inner.file.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut file) = file {
            file.flush().map_err(|error| StorageError::Close {
                path: self.inner.log_file.clone(),
                error,
            })?;
        }
        Ok(())
    }

    /// Creates a name-scoped proxy over this sink.
    pub fn proxy(&self, scope: impl Into<String>) -> LogProxy {
        LogProxy {
            sink: Some(self.clone()),
            scope: scope.into(),
        }
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.remote.lock() {
            if let Some(worker) = guard.take() {
                worker.join();
            }
        }
    }
}

#[derive(Debug)]
struct RemoteWorker {
    sender: Sender<RemoteLogEntry>,
    handle: thread::JoinHandle<()>,
}

impl RemoteWorker {
    fn spawn(mut store: Box<dyn RemoteLogStore>, mut dump: SpillQueue) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<RemoteLogEntry>();
        let handle = thread::Builder::new()
            .name("rigtest-log-upload".to_owned())
            .spawn(move || {
                // Iteration ends when every sender is dropped, so a flush
                // drains the queue before the join returns.
                for entry in receiver {
                    if let Err(error) = store.upload_entry(&entry) {
                        tracing::warn!(
                            "cannot upload a log entry to the remote store: {error}, \
                             preserving it in the dump file"
                        );
                        if let Err(error) = dump.append(entry.as_dump_line()) {
                            tracing::warn!("cannot preserve the log entry: {error}");
                        }
                    }
                }
                if !dump.is_empty() {
                    if let Err(error) = dump.flush() {
                        tracing::warn!("cannot flush the remote dump file: {error}");
                    }
                }
            })
            .expect("log upload thread spawned");
        Self { sender, handle }
    }

    fn join(self) {
        drop(self.sender);
        if self.handle.join().is_err() {
            tracing::warn!("the remote log worker panicked");
        }
    }
}

/// A name-scoped logging facade handed to device resources.
///
/// Prefixes every message with `[device,role,resource]` identification. A
/// detached proxy (no parent sink) prints to stdout only, which satisfies
/// the logging contract for resources created before a real sink exists.
#[derive(Clone, Debug)]
pub struct LogProxy {
    sink: Option<LogSink>,
    scope: String,
}

impl LogProxy {
    /// Creates a proxy that forwards to `sink`.
    pub fn new(sink: &LogSink, scope: impl Into<String>) -> Self {
        sink.proxy(scope)
    }

    /// Creates a print-only proxy with no parent sink.
    pub fn detached(scope: impl Into<String>) -> Self {
        Self {
            sink: None,
            scope: scope.into(),
        }
    }

    /// The identification scope decorating every message.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Replaces the identification scope.
    pub fn set_scope(&mut self, scope: impl Into<String>) {
        self.scope = scope.into();
    }

    /// The parent sink's log directory, if attached.
    pub fn log_dir(&self) -> Option<&Utf8Path> {
        self.sink.as_ref().map(LogSink::log_dir)
    }

    fn forward(&self, severity: Severity, message: fmt::Arguments<'_>) {
        let decorated = format!("[{}]: {message}", self.scope);
        match &self.sink {
            Some(sink) => sink.log(severity, decorated),
            None => println!("{} - {decorated}", Local::now().format(TIMESTAMP_FORMAT)),
        }
    }

    /// Logs a scoped record at [`Severity::Debug`].
    pub fn debug(&self, message: impl fmt::Display) {
        self.forward(Severity::Debug, format_args!("{message}"));
    }

    /// Logs a scoped record at [`Severity::Info`].
    pub fn info(&self, message: impl fmt::Display) {
        self.forward(Severity::Info, format_args!("{message}"));
    }

    /// Logs a scoped record at [`Severity::Warn`].
    pub fn warn(&self, message: impl fmt::Display) {
        self.forward(Severity::Warn, format_args!("{message}"));
    }

    /// Logs a scoped record at [`Severity::Error`].
    pub fn error(&self, message: impl fmt::Display) {
        self.forward(Severity::Error, format_args!("{message}"));
    }

    /// Logs a scoped record at [`Severity::Critical`].
    pub fn critical(&self, message: impl fmt::Display) {
        self.forward(Severity::Critical, format_args!("{message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingStore {
        uploads: Arc<Mutex<Vec<String>>>,
    }

    impl RemoteLogStore for RecordingStore {
        fn upload_entry(&mut self, entry: &RemoteLogEntry) -> Result<(), RemoteLogError> {
            self.uploads
                .lock()
                .unwrap()
                .push(format!("{}:{}", entry.severity, entry.message));
            Ok(())
        }
    }

    struct FailingStore;

    impl RemoteLogStore for FailingStore {
        fn upload_entry(&mut self, _entry: &RemoteLogEntry) -> Result<(), RemoteLogError> {
            Err(RemoteLogError::new("store offline"))
        }
    }

    fn read_log(sink: &LogSink) -> Vec<String> {
        let contents = fs::read_to_string(sink.log_file()).unwrap();
        contents.lines().map(str::to_owned).collect()
    }

    #[test]
    fn round_trips_messages_through_the_local_file() {
        let dir = Utf8TempDir::new().unwrap();
        let sink = LogSink::builder("round_trip")
            .root(dir.path())
            .build()
            .unwrap();
        let messages = ["first message", "second message", "third 测试"];
        for message in messages {
            sink.info(message);
        }
        sink.close().unwrap();

        let lines = read_log(&sink);
        assert_eq!(lines.len(), messages.len());
        for (line, message) in lines.iter().zip(messages) {
            assert!(line.contains(message), "`{line}` contains `{message}`");
            assert!(line.contains(" - INFO - "), "`{line}` carries severity");
        }
    }

    #[test]
    fn normalizes_structured_and_list_payloads() {
        let dir = Utf8TempDir::new().unwrap();
        let sink = LogSink::builder("payloads")
            .root(dir.path())
            .build()
            .unwrap();
        sink.debug(json!({"volume": 35}));
        sink.warn(vec!["left".to_owned(), "right".to_owned()]);
        sink.close().unwrap();

        let lines = read_log(&sink);
        assert!(lines[0].contains(r#"{"volume":35}"#));
        assert!(lines[1].contains("left,right"));
        assert!(lines[1].contains("WARNING"));
    }

    #[test]
    fn folder_name_uses_sanitized_label_and_result_id() {
        let dir = Utf8TempDir::new().unwrap();
        let sink = LogSink::builder("case (1):x")
            .root(dir.path())
            .result_id(42)
            .build()
            .unwrap();
        assert_eq!(
            sink.log_dir().file_name().unwrap(),
            "case__1__x.42",
            "unsafe characters replaced, result id appended"
        );
    }

    #[test]
    fn proxy_decorates_messages_with_scope() {
        let dir = Utf8TempDir::new().unwrap();
        let sink = LogSink::builder("proxy").root(dir.path()).build().unwrap();
        let proxy = sink.proxy("tal,leader,rig-1");
        proxy.info("power state is on");
        sink.close().unwrap();

        let lines = read_log(&sink);
        assert!(lines[0].contains("[tal,leader,rig-1]: power state is on"));
    }

    #[test]
    fn detached_proxy_only_prints() {
        let proxy = LogProxy::detached("sound_card,,card-0");
        // Must not panic without a parent sink.
        proxy.debug("no sink yet");
        assert!(proxy.log_dir().is_none());
    }

    #[test]
    fn remote_entries_are_uploaded_in_order() {
        let dir = Utf8TempDir::new().unwrap();
        let uploads = Arc::new(Mutex::new(Vec::new()));
        let store = RecordingStore {
            uploads: Arc::clone(&uploads),
        };
        let sink = LogSink::builder("remote")
            .root(dir.path())
            .result_id(7)
            .remote_store(Box::new(store))
            .build()
            .unwrap();
        sink.info("one");
        sink.error("two");
        sink.debug("three");
        sink.flush();

        assert_eq!(
            *uploads.lock().unwrap(),
            vec!["INFO:one", "ERROR:two", "DEBUG:three"]
        );
    }

    #[test]
    fn failed_uploads_are_preserved_in_the_dump_file() {
        let dir = Utf8TempDir::new().unwrap();
        let sink = LogSink::builder("dump")
            .root(dir.path())
            .result_id(11)
            .remote_store(Box::new(FailingStore))
            .build()
            .unwrap();
        sink.info("first");
        sink.info("second");
        sink.flush();

        let dump = fs::read_to_string(sink.log_dir().join(REMOTE_DUMP_FILE_NAME)).unwrap();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("first"));
        assert!(lines[1].contains("second"));
    }

    #[test]
    fn without_result_id_no_remote_upload_happens() {
        let dir = Utf8TempDir::new().unwrap();
        let uploads = Arc::new(Mutex::new(Vec::new()));
        let store = RecordingStore {
            uploads: Arc::clone(&uploads),
        };
        let sink = LogSink::builder("local_only")
            .root(dir.path())
            .remote_store(Box::new(store))
            .build()
            .unwrap();
        sink.info("stays local");
        sink.flush();
        assert!(uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn close_is_benign_when_called_twice() {
        let dir = Utf8TempDir::new().unwrap();
        let sink = LogSink::builder("double_close")
            .root(dir.path())
            .build()
            .unwrap();
        sink.info("before close");
        sink.close().unwrap();
        sink.close().unwrap();
    }
}

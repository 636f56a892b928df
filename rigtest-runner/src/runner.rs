// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution envelope around one test method.
//!
//! A [`TestCaseRunner`] is built for a single test case: it creates the
//! [`LogSink`], binds rig resources through a [`ResourceBinder`] (binding
//! failures propagate before the test method runs), and then drives the
//! [`TestCase`] lifecycle under standard unit-test semantics. Failures are
//! reported to a [`RunObserver`]; the runner itself never declares a pass —
//! the "no report means passed" policy lives in
//! [`ResultAdapter::finish`](crate::reporter::ResultAdapter::finish).

use crate::{
    errors::{DisplayErrorChain, SetupError, StorageError},
    log_sink::{LogSink, LogSinkBuilder},
    reporter::RunObserver,
    resource::{BoundContext, ResourceBinder, ResourceMap},
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use std::{error, fmt, time::Duration};

const BANNER_RULE: &str = "*******************************************";
const BANNER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifies one test case to the harness.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestId {
    /// A test registered in the result database under a numeric id.
    Registered(i64),
    /// A locally named test with no database row, e.g. a smoke check run
    /// from a developer machine.
    Adhoc(String),
}

impl TestId {
    /// Creates an ad-hoc id from a local name.
    pub fn adhoc(name: impl Into<String>) -> Self {
        TestId::Adhoc(name.into())
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestId::Registered(id) => write!(f, "{id}"),
            TestId::Adhoc(name) => f.write_str(name),
        }
    }
}

/// Static facts about one test case: its id, the class and method names
/// used for annotation keys, and an optional external display name.
#[derive(Clone, Debug)]
pub struct TestCaseInfo {
    id: TestId,
    class_name: String,
    method_name: String,
    display_name: Option<String>,
}

impl TestCaseInfo {
    /// Creates the info for `class_name::method_name` under `id`.
    pub fn new(
        id: TestId,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            method_name: method_name.into(),
            display_name: None,
        }
    }

    /// Attaches the display name the external test-management system uses.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The test id.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// The test-class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The test-method name.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The external display name, if one was registered.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// The `<class>.<method>` base key failure reports are filed under.
    pub fn annotation_key(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

/// An error raised by a [`TestCase`] phase.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// An assertion did not hold. Maps to the `Failed` outcome.
    #[error("{message}")]
    Assertion {
        /// What did not hold.
        message: String,
    },

    /// The test asked to be skipped. Sets the orthogonal skip flag.
    #[error("skipped: {reason}")]
    Skip {
        /// Why the test cannot run in this environment.
        reason: String,
    },

    /// Anything else. Maps to the `Error` outcome.
    #[error(transparent)]
    Unexpected {
        /// The underlying error.
        #[from]
        source: Box<dyn error::Error + Send + Sync>,
    },
}

impl TestError {
    /// Creates an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        TestError::Assertion {
            message: message.into(),
        }
    }

    /// Creates a skip request.
    pub fn skip(reason: impl Into<String>) -> Self {
        TestError::Skip {
            reason: reason.into(),
        }
    }

    /// Wraps an arbitrary error.
    pub fn unexpected(source: impl error::Error + Send + Sync + 'static) -> Self {
        TestError::Unexpected {
            source: Box::new(source),
        }
    }
}

/// What a test case sees while it runs: its own info, the shared log sink,
/// and the bound resources.
#[derive(Debug)]
pub struct TestContext<'a> {
    info: &'a TestCaseInfo,
    sink: &'a LogSink,
    resources: &'a BoundContext,
}

impl TestContext<'_> {
    /// The test case's static info.
    pub fn info(&self) -> &TestCaseInfo {
        self.info
    }

    /// The per-test log sink.
    pub fn sink(&self) -> &LogSink {
        self.sink
    }

    /// The bound resource view.
    pub fn resources(&self) -> &BoundContext {
        self.resources
    }

    /// The product name of a single-device test's DUT. `None` when the
    /// context is multi-device or no target-control link is bound.
    pub fn product_name(&self) -> Option<String> {
        self.resources.single().and_then(|group| group.product_name())
    }
}

/// The lifecycle a test case runs through.
///
/// Set-up, body and tear-down follow standard unit-test semantics: a
/// `set_up` error skips both the body and `tear_down`; a body error still
/// runs `tear_down`. [`on_fail`](Self::on_fail) is the post-processing hook
/// invoked when the body reports an assertion failure.
pub trait TestCase {
    /// Prepares the device for the scenario.
    fn set_up(&mut self, cx: &mut TestContext<'_>) -> Result<(), TestError> {
        let _ = cx;
        Ok(())
    }

    /// The scenario body.
    fn run(&mut self, cx: &mut TestContext<'_>) -> Result<(), TestError>;

    /// Restores the device after the scenario, pass or fail.
    fn tear_down(&mut self, cx: &mut TestContext<'_>) -> Result<(), TestError> {
        let _ = cx;
        Ok(())
    }

    /// Extra cleanup when the body reported an assertion failure.
    fn on_fail(&mut self, cx: &mut TestContext<'_>) {
        let _ = cx;
    }
}

/// Where a runner currently is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunnerState {
    /// Resources are bound and the sink is open.
    Bound,
    /// The test method is executing.
    Running,
    /// Execution ended; teardown of the envelope is still pending.
    Finished,
}

/// Wall-clock start and monotonic duration of one execution.
#[derive(Clone, Copy, Debug)]
pub struct RunTiming {
    /// When the banner was logged and the stopwatch started.
    pub start_time: DateTime<Local>,
    /// How long execution took, set_up through tear_down.
    pub duration: Duration,
}

/// Runs one test case: binds, banners, executes, reports, releases.
#[derive(Debug)]
pub struct TestCaseRunner {
    info: TestCaseInfo,
    sink: LogSink,
    resources: BoundContext,
    state: RunnerState,
    timing: Option<RunTiming>,
}

impl TestCaseRunner {
    /// Builds the execution envelope: creates the log sink from `sink` and
    /// binds `groups` through `binder`.
    ///
    /// Binding failures are logged, the sink is released, and the error
    /// propagates — the test method never runs against a partially bound
    /// context.
    pub fn build(
        info: TestCaseInfo,
        binder: &ResourceBinder,
        groups: &ResourceMap,
        roles: Option<&[String]>,
        sink: LogSinkBuilder,
    ) -> Result<Self, SetupError> {
        let sink = sink.build()?;
        let resources = match binder.bind(groups, roles, &sink) {
            Ok(resources) => resources,
            Err(error) => {
                sink.error(DisplayErrorChain::new(&error).to_string());
                if let Err(close_error) = sink.close() {
                    tracing::warn!("cannot release the log sink after a bind failure: {close_error}");
                }
                return Err(error.into());
            }
        };
        Ok(Self {
            info,
            sink,
            resources,
            state: RunnerState::Bound,
            timing: None,
        })
    }

    /// The test case this runner executes.
    pub fn info(&self) -> &TestCaseInfo {
        &self.info
    }

    /// The per-test log sink.
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// The bound resource view.
    pub fn resources(&self) -> &BoundContext {
        &self.resources
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// The timing of the last execution, if one ran.
    pub fn timing(&self) -> Option<&RunTiming> {
        self.timing.as_ref()
    }

    /// Executes the test case, reporting every raised error to `observer`.
    ///
    /// Returns the execution timing. The runner stays usable afterwards so
    /// the driver can retrieve syslogs and reports against the still-bound
    /// context before calling [`finish`](Self::finish).
    pub fn execute<T: TestCase>(
        &mut self,
        test: &mut T,
        observer: &mut dyn RunObserver,
    ) -> RunTiming {
        self.state = RunnerState::Running;
        let stopwatch = stopwatch();
        self.log_start_banner(stopwatch.start_time());

        let mut cx = TestContext {
            info: &self.info,
            sink: &self.sink,
            resources: &self.resources,
        };

        match test.set_up(&mut cx) {
            Ok(()) => {
                if let Err(error) = test.run(&mut cx) {
                    self.report(observer, &error, "test method");
                    if matches!(error, TestError::Assertion { .. }) {
                        test.on_fail(&mut cx);
                    }
                }
                if let Err(error) = test.tear_down(&mut cx) {
                    // Classified like a body failure; the aggregator latch
                    // keeps an earlier verdict in place.
                    self.report(observer, &error, "tear_down");
                }
            }
            Err(error) => {
                // set_up did not complete, so neither the body nor
                // tear_down runs.
                self.report(observer, &error, "set_up");
            }
        }

        let snapshot = stopwatch.snapshot();
        let timing = RunTiming {
            start_time: snapshot.start_time,
            duration: snapshot.duration,
        };
        self.log_stop_banner(&snapshot.end_time(), snapshot.duration);
        self.state = RunnerState::Finished;
        self.timing = Some(timing);
        timing
    }

    /// Tears down the envelope: drains the remote uploader and closes the
    /// log file. Returns the log directory for artifact upload.
    pub fn finish(self) -> Result<Utf8PathBuf, StorageError> {
        let log_dir = self.sink.log_dir().to_owned();
        self.sink.close()?;
        Ok(log_dir)
    }

    /// The directory artifacts for this execution land in.
    pub fn log_dir(&self) -> &Utf8Path {
        self.sink.log_dir()
    }

    fn report(&self, observer: &mut dyn RunObserver, error: &TestError, phase: &str) {
        match error {
            TestError::Skip { reason } => {
                self.sink
                    .info(format!("{phase} requested a skip: {reason}"));
                observer.add_skip(&self.info, reason);
            }
            TestError::Assertion { message } => {
                self.sink
                    .error(format!("{phase} assertion failed: {message}"));
                observer.add_failure(&self.info, &DisplayErrorChain::new(error).to_string());
            }
            TestError::Unexpected { .. } => {
                self.sink.error(format!(
                    "{phase} stopped because of exception: {}",
                    DisplayErrorChain::new(error)
                ));
                observer.add_error(&self.info, &DisplayErrorChain::new(error).to_string());
            }
        }
    }

    fn log_start_banner(&self, start_time: DateTime<Local>) {
        self.sink.info(BANNER_RULE);
        self.sink.info(format!("Test case id: {}", self.info.id()));
        self.sink
            .info(format!("Test case method name: {}", self.info.method_name()));
        if let Some(display_name) = self.info.display_name() {
            self.sink
                .info(format!("Test case display name: {display_name}"));
        }
        self.sink.info(format!(
            "Start time: {}",
            start_time.format(BANNER_TIME_FORMAT)
        ));
        self.sink.info(BANNER_RULE);
    }

    fn log_stop_banner(&self, end_time: &DateTime<Local>, duration: Duration) {
        self.sink.info(BANNER_RULE);
        self.sink
            .info(format!("Stop time: {}", end_time.format(BANNER_TIME_FORMAT)));
        self.sink
            .info(format!("Elapsed: {:.3}s", duration.as_secs_f64()));
        self.sink.info(BANNER_RULE);
    }
}

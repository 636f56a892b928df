// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The outcome state machine and its adapter to the runner's observer
//! contract.

use crate::runner::TestCaseInfo;
use indexmap::IndexMap;
use std::fmt;

/// The verdict of one test-case execution.
///
/// Starts at `Untested` and latches on the first terminal value: later
/// attempts to set a different verdict only merge their annotations. The
/// skip flag lives next to the outcome on [`OutcomeAggregator`] and is
/// orthogonal to it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Outcome {
    /// No verdict has been reported yet.
    #[default]
    Untested,
    /// The test completed without any reported failure.
    Passed,
    /// An assertion did not hold.
    Failed,
    /// Something other than an assertion went wrong.
    Error,
}

impl Outcome {
    /// The lower-case wire name of this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Untested => "untested",
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about the execution of a single test case: the latched
/// outcome, a diagnostic annotation map, and the orthogonal skip flag.
///
/// Annotations carry artifact paths, extracted log excerpts and exception
/// traces without altering the verdict. Keys keep insertion order so
/// reports read in the order things happened.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    outcome: Outcome,
    annotations: IndexMap<String, String>,
    skip_reason: Option<String>,
}

impl OutcomeAggregator {
    /// Creates an aggregator in the `Untested` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current verdict.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// The annotation map, in insertion order.
    pub fn annotations(&self) -> &IndexMap<String, String> {
        &self.annotations
    }

    /// The skip reason, if a skip was requested.
    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// True if a skip was requested, regardless of the verdict.
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    /// Latches the verdict at `Passed`.
    pub fn pass(&mut self) {
        self.latch(Outcome::Passed);
    }

    /// Latches the verdict at `Failed`.
    pub fn fail(&mut self) {
        self.latch(Outcome::Failed);
    }

    /// Merges `annotations`, then latches the verdict at `Failed`.
    pub fn fail_with<I>(&mut self, annotations: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.annotate(annotations);
        self.fail();
    }

    /// Latches the verdict at `Error`.
    pub fn error(&mut self) {
        self.latch(Outcome::Error);
    }

    /// Merges `annotations`, then latches the verdict at `Error`.
    pub fn error_with<I>(&mut self, annotations: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.annotate(annotations);
        self.error();
    }

    /// Records a skip request. The verdict is left alone.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip_reason = Some(reason.into());
    }

    /// Merges annotations into the map, last write wins per key.
    pub fn annotate<I>(&mut self, annotations: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.annotations.extend(annotations);
    }

    /// Inserts one annotation under `key`, suffixing `_1`, `_2`, … on
    /// collision until the key is unique. Returns the key actually used.
    ///
    /// A single aggregator may be inspected across repeated or
    /// parameterized invocations, so failure reports must never overwrite
    /// each other.
    pub fn annotate_unique(&mut self, key: impl Into<String>, value: impl Into<String>) -> String {
        let base = key.into();
        let mut key = base.clone();
        let mut counter = 1;
        while self.annotations.contains_key(&key) {
            key = format!("{base}_{counter}");
            counter += 1;
        }
        self.annotations.insert(key.clone(), value.into());
        key
    }

    fn latch(&mut self, outcome: Outcome) {
        if self.outcome == Outcome::Untested {
            self.outcome = outcome;
        }
    }
}

/// The observer contract a test runner reports through.
///
/// Mirrors the failure/error/skip callbacks of a generic unit-test result
/// collector; [`ResultAdapter`] is the harness implementation.
pub trait RunObserver {
    /// An assertion did not hold. `trace` is the rendered failure detail.
    fn add_failure(&mut self, test: &TestCaseInfo, trace: &str);

    /// A non-assertion error was raised. `trace` is the rendered error
    /// chain.
    fn add_error(&mut self, test: &TestCaseInfo, trace: &str);

    /// The test asked to be skipped.
    fn add_skip(&mut self, test: &TestCaseInfo, reason: &str);
}

/// Adapts [`RunObserver`] callbacks onto an [`OutcomeAggregator`].
///
/// Each failure/error report is filed under a `<class>.<method>` annotation
/// key, de-duplicated with numeric suffixes, holding the rendered trace.
/// [`finish`](Self::finish) applies the pass policy: a run that reported
/// nothing passed.
#[derive(Debug, Default)]
pub struct ResultAdapter {
    results: OutcomeAggregator,
}

impl ResultAdapter {
    /// Creates an adapter over a fresh aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregator collecting reports.
    pub fn results(&self) -> &OutcomeAggregator {
        &self.results
    }

    /// Mutable access for attaching diagnostics mid-run.
    pub fn results_mut(&mut self) -> &mut OutcomeAggregator {
        &mut self.results
    }

    /// Closes the run and returns the aggregate. An `Untested` verdict
    /// becomes `Passed`: the runner only reports exceptions, so no report
    /// means the method returned normally.
    pub fn finish(mut self) -> OutcomeAggregator {
        if self.results.outcome() == Outcome::Untested {
            self.results.pass();
        }
        self.results
    }
}

impl RunObserver for ResultAdapter {
    fn add_failure(&mut self, test: &TestCaseInfo, trace: &str) {
        self.results.annotate_unique(test.annotation_key(), trace);
        self.results.fail();
    }

    fn add_error(&mut self, test: &TestCaseInfo, trace: &str) {
        self.results.annotate_unique(test.annotation_key(), trace);
        self.results.error();
    }

    fn add_skip(&mut self, _test: &TestCaseInfo, reason: &str) {
        self.results.skip(reason);
    }
}

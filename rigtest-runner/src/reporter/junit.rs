// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendering finished outcomes into a JUnit XML report.

use crate::{
    errors::JunitWriteError,
    reporter::{Outcome, OutcomeAggregator},
    runner::{RunTiming, TestCaseInfo},
};
use camino::Utf8Path;
use fs_err as fs;
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};

/// Collects finished test cases into JUnit test suites, one suite per test
/// class, and writes the combined report.
///
/// Outcomes map to JUnit statuses (`Failed` → failure, `Error` → error,
/// skip flag → skipped, `Untested` → skipped with a note), and annotations
/// become suite properties prefixed with the method name.
#[derive(Debug)]
pub struct JunitRenderer {
    report_name: String,
    test_suites: IndexMap<String, TestSuite>,
}

impl JunitRenderer {
    /// Creates a renderer for a report named `report_name`.
    pub fn new(report_name: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            test_suites: IndexMap::new(),
        }
    }

    /// Records one finished test case under its class's suite.
    pub fn record(
        &mut self,
        info: &TestCaseInfo,
        results: &OutcomeAggregator,
        timing: Option<&RunTiming>,
    ) {
        let mut status = if let Some(reason) = results.skip_reason() {
            let mut status = TestCaseStatus::skipped();
            status.set_message(reason);
            status
        } else {
            match results.outcome() {
                Outcome::Passed => TestCaseStatus::success(),
                Outcome::Failed => {
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                    status.set_type("test failure");
                    status
                }
                Outcome::Error => {
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Error);
                    status.set_type("test error");
                    status
                }
                Outcome::Untested => {
                    let mut status = TestCaseStatus::skipped();
                    status.set_message("no outcome was reported");
                    status
                }
            }
        };

        if !results.annotations().is_empty()
            && matches!(results.outcome(), Outcome::Failed | Outcome::Error)
        {
            if let Some((_, first)) = results.annotations().first() {
                if let Some(first_line) = first.lines().next() {
                    status.set_message(first_line);
                }
            }
            let description: Vec<String> = results
                .annotations()
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect();
            status.set_description(description.join("\n"));
        }

        let mut test_case = TestCase::new(info.method_name(), status);
        test_case.set_classname(info.class_name());
        if let Some(timing) = timing {
            test_case
                .set_timestamp(timing.start_time)
                .set_time(timing.duration);
        }

        let suite = self
            .test_suites
            .entry(info.class_name().to_owned())
            .or_insert_with(|| TestSuite::new(info.class_name()));
        for (key, value) in results.annotations() {
            suite.add_property((format!("{}:{key}", info.method_name()), value.clone()));
        }
        suite.add_test_case(test_case);
    }

    /// Writes the report to `path`, creating parent directories as needed.
    pub fn write_to(&self, path: &Utf8Path) -> Result<(), JunitWriteError> {
        let mut report = Report::new(self.report_name.clone());
        report.add_test_suites(self.test_suites.values().cloned());

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|error| JunitWriteError::Fs {
                file: dir.to_owned(),
                error,
            })?;
        }
        let file = fs::File::create(path).map_err(|error| JunitWriteError::Fs {
            file: path.to_owned(),
            error,
        })?;
        report
            .serialize(file)
            .map_err(|error| JunitWriteError::Junit {
                file: path.to_owned(),
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestId;
    use camino_tempfile::Utf8TempDir;

    fn info(method: &str) -> TestCaseInfo {
        TestCaseInfo::new(TestId::Registered(42), "SoundVolume", method)
    }

    fn rendered(renderer: &JunitRenderer) -> String {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("reports").join("junit.xml");
        renderer.write_to(&path).unwrap();
        fs::read_to_string(&path).unwrap()
    }

    #[test]
    fn passed_case_renders_as_plain_testcase() {
        let mut renderer = JunitRenderer::new("rigtest-run");
        let mut results = OutcomeAggregator::new();
        results.pass();
        renderer.record(&info("test_volume_up"), &results, None);

        let xml = rendered(&renderer);
        assert!(xml.contains(r#"name="test_volume_up""#));
        assert!(xml.contains(r#"classname="SoundVolume""#));
        assert!(!xml.contains("<failure"));
        assert!(!xml.contains("<error"));
    }

    #[test]
    fn failed_case_carries_message_and_description() {
        let mut renderer = JunitRenderer::new("rigtest-run");
        let mut results = OutcomeAggregator::new();
        results.fail_with([(
            "SoundVolume.test_volume_up".to_owned(),
            "no sound detected\nat step 3".to_owned(),
        )]);
        renderer.record(&info("test_volume_up"), &results, None);

        let xml = rendered(&renderer);
        assert!(xml.contains("<failure"));
        assert!(xml.contains("no sound detected"));
        assert!(xml.contains(r#"type="test failure""#));
    }

    #[test]
    fn error_and_skip_map_to_their_junit_statuses() {
        let mut renderer = JunitRenderer::new("rigtest-run");

        let mut errored = OutcomeAggregator::new();
        errored.error_with([("key".to_owned(), "target rebooted".to_owned())]);
        renderer.record(&info("test_volume_down"), &errored, None);

        let mut skipped = OutcomeAggregator::new();
        skipped.skip("follower offline");
        renderer.record(&info("test_beolink"), &skipped, None);

        let xml = rendered(&renderer);
        assert!(xml.contains("<error"));
        assert!(xml.contains(r#"type="test error""#));
        assert!(xml.contains("<skipped"));
        assert!(xml.contains("follower offline"));
    }

    #[test]
    fn untested_case_renders_as_skipped_with_a_note() {
        let mut renderer = JunitRenderer::new("rigtest-run");
        let results = OutcomeAggregator::new();
        renderer.record(&info("test_never_ran"), &results, None);

        let xml = rendered(&renderer);
        assert!(xml.contains("<skipped"));
        assert!(xml.contains("no outcome was reported"));
    }

    #[test]
    fn annotations_become_method_prefixed_suite_properties() {
        let mut renderer = JunitRenderer::new("rigtest-run");
        let mut results = OutcomeAggregator::new();
        results.pass();
        results.annotate([("syslog".to_owned(), "/logs/42/syslog.txt".to_owned())]);
        renderer.record(&info("test_volume_up"), &results, None);

        let xml = rendered(&renderer);
        assert!(xml.contains(r#"name="test_volume_up:syslog""#));
        assert!(xml.contains("/logs/42/syslog.txt"));
    }

    #[test]
    fn classes_share_one_suite() {
        let mut renderer = JunitRenderer::new("rigtest-run");
        let mut results = OutcomeAggregator::new();
        results.pass();
        renderer.record(&info("test_volume_up"), &results, None);
        renderer.record(&info("test_volume_down"), &results, None);

        let xml = rendered(&renderer);
        assert_eq!(xml.matches("<testsuite ").count(), 1);
        assert_eq!(xml.matches("<testcase").count(), 2);
    }
}

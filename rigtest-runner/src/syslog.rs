// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword analysis of retrieved device syslogs.
//!
//! A test run writes a unique marker into the device syslog when it starts.
//! [`analyze_syslog`] scans the lines after that marker for keywords and
//! files the hits on the outcome as a JSON annotation, merging with any
//! analysis already present (a multi-device test analyzes one file per
//! role). The annotation never alters the verdict.

use crate::reporter::OutcomeAggregator;
use camino::Utf8Path;
use fs_err as fs;
use serde_json::{Map, Value};

/// The annotation key syslog analysis results are stored under.
pub const SYSLOG_ANNOTATION_KEY: &str = "syslog";

/// Scans the syslog at `path` for `keywords`, starting at the line after
/// the last line containing `marker`.
///
/// Hits are recorded as `(<line-number>): <line>` entries grouped under the
/// keyword (or `<role>_<keyword>` when `role` is given) and merged into the
/// outcome's existing `syslog` annotation. Returns whether any post-marker
/// line was examined; a missing file or an empty keyword list examines
/// nothing and leaves the annotations untouched.
pub fn analyze_syslog(
    path: &Utf8Path,
    marker: &str,
    keywords: &[&str],
    role: Option<&str>,
    results: &mut OutcomeAggregator,
) -> bool {
    if !path.exists() {
        tracing::warn!("the syslog `{path}` does not exist, skipping the analysis");
        return false;
    }
    if keywords.is_empty() {
        tracing::warn!("there are no keywords for the syslog analysis");
        return false;
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            tracing::warn!("cannot read the syslog `{path}`: {error}");
            return false;
        }
    };

    let mut hits = previous_hits(results);
    let mut marker_found = false;
    let mut analyzed = false;
    for (index, line) in contents.lines().enumerate() {
        if !marker_found {
            marker_found = line.contains(marker);
            continue;
        }
        analyzed = true;
        for keyword in keywords {
            if !line.contains(keyword) {
                continue;
            }
            let key = match role {
                Some(role) => format!("{role}_{keyword}"),
                None => (*keyword).to_owned(),
            };
            let entry = Value::String(format!("({}): {line}", index + 1));
            match hits.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(entries) => entries.push(entry),
                other => *other = Value::Array(vec![entry]),
            }
        }
    }

    results.annotate([(
        SYSLOG_ANNOTATION_KEY.to_owned(),
        Value::Object(hits).to_string(),
    )]);
    analyzed
}

/// Parses the hits of an earlier analysis back out of the annotation map.
fn previous_hits(results: &OutcomeAggregator) -> Map<String, Value> {
    let Some(raw) = results.annotations().get(SYSLOG_ANNOTATION_KEY) else {
        return Map::new();
    };
    match serde_json::from_str(raw) {
        Ok(Value::Object(hits)) => hits,
        _ => {
            tracing::warn!("discarding an unreadable previous syslog analysis");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SYSLOG: &str = indoc! {"
        kernel: boot complete
        app: Sink graph connected 222
        daemon: WARN low buffer
        kernel: all good
        daemon: WARN underrun
    "};

    fn syslog_file(dir: &Utf8TempDir) -> camino::Utf8PathBuf {
        let path = dir.path().join("syslog.txt");
        fs::write(&path, SYSLOG).unwrap();
        path
    }

    fn parsed(results: &OutcomeAggregator) -> Value {
        serde_json::from_str(&results.annotations()[SYSLOG_ANNOTATION_KEY]).unwrap()
    }

    #[test]
    fn missing_file_analyzes_nothing() {
        let dir = Utf8TempDir::new().unwrap();
        let mut results = OutcomeAggregator::new();
        let analyzed = analyze_syslog(
            &dir.path().join("not_there.txt"),
            "222",
            &["WARN"],
            None,
            &mut results,
        );
        assert!(!analyzed);
        assert!(results.annotations().is_empty());
    }

    #[test]
    fn empty_keyword_list_analyzes_nothing() {
        let dir = Utf8TempDir::new().unwrap();
        let path = syslog_file(&dir);
        let mut results = OutcomeAggregator::new();
        assert!(!analyze_syslog(&path, "222", &[], None, &mut results));
        assert!(results.annotations().is_empty());
    }

    #[test]
    fn marker_not_found_annotates_empty_hits() {
        let dir = Utf8TempDir::new().unwrap();
        let path = syslog_file(&dir);
        let mut results = OutcomeAggregator::new();
        let analyzed = analyze_syslog(&path, "no such marker", &["WARN"], None, &mut results);
        assert!(!analyzed);
        assert_eq!(parsed(&results), json!({}));
    }

    #[test]
    fn collects_hits_after_the_marker_with_line_numbers() {
        let dir = Utf8TempDir::new().unwrap();
        let path = syslog_file(&dir);
        let mut results = OutcomeAggregator::new();
        let analyzed = analyze_syslog(&path, "Sink graph connected 222", &["WARN"], None, &mut results);
        assert!(analyzed);
        assert_eq!(
            parsed(&results),
            json!({
                "WARN": [
                    "(3): daemon: WARN low buffer",
                    "(5): daemon: WARN underrun",
                ],
            })
        );
    }

    #[test]
    fn marker_line_itself_is_not_analyzed() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("syslog.txt");
        fs::write(&path, "WARN marker 222\ntail line\n").unwrap();
        let mut results = OutcomeAggregator::new();
        let analyzed = analyze_syslog(&path, "222", &["WARN"], None, &mut results);
        assert!(analyzed, "one line after the marker was examined");
        assert_eq!(parsed(&results), json!({}));
    }

    #[test]
    fn role_prefixes_the_keyword_key() {
        let dir = Utf8TempDir::new().unwrap();
        let path = syslog_file(&dir);
        let mut results = OutcomeAggregator::new();
        analyze_syslog(&path, "222", &["WARN"], Some("leader"), &mut results);
        let hits = parsed(&results);
        assert!(hits.get("leader_WARN").is_some());
        assert!(hits.get("WARN").is_none());
    }

    #[test]
    fn second_analysis_merges_with_the_first() {
        let dir = Utf8TempDir::new().unwrap();
        let path = syslog_file(&dir);
        let mut results = OutcomeAggregator::new();
        analyze_syslog(&path, "222", &["WARN"], Some("leader"), &mut results);
        analyze_syslog(&path, "222", &["WARN"], Some("follower"), &mut results);

        let hits = parsed(&results);
        assert_eq!(hits.as_object().unwrap().len(), 2);
        assert_eq!(hits["leader_WARN"].as_array().unwrap().len(), 2);
        assert_eq!(hits["follower_WARN"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn analysis_does_not_change_the_verdict() {
        let dir = Utf8TempDir::new().unwrap();
        let path = syslog_file(&dir);
        let mut results = OutcomeAggregator::new();
        results.fail();
        analyze_syslog(&path, "222", &["WARN"], None, &mut results);
        assert_eq!(results.outcome(), crate::reporter::Outcome::Failed);
    }
}

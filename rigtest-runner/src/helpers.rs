// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for rigtest-runner.

use chrono::{DateTime, Local};

/// Characters that operating systems or remote stores mishandle in path
/// components.
const UNSAFE_COMPONENT_CHARS: [char; 4] = [':', '(', ')', ' '];

/// Replaces filesystem-unsafe characters in a path component with `_`.
///
/// Lab resource names routinely contain `host:port` pairs and parenthesized
/// descriptions, neither of which survives as a directory name everywhere.
pub(crate) fn sanitize_component(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if UNSAFE_COMPONENT_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Escapes spaces and parens in a remote path component with a backslash.
pub(crate) fn escape_remote_component(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for c in component.chars() {
        if matches!(c, ' ' | '(' | ')') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Formats a timestamp the way log folder names and upload-collision
/// suffixes expect it: `YYYY_MM_DD_HH_MM_SS`.
pub(crate) fn folder_timestamp(timestamp: DateTime<Local>) -> String {
    timestamp.format("%Y_%m_%d_%H_%M_%S").to_string()
}

// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcome tracking and report rendering.
//!
//! [`OutcomeAggregator`] holds the verdict of one test-case execution plus a
//! diagnostic annotation side-channel. [`ResultAdapter`] adapts it to the
//! [`RunObserver`] contract the runner reports through, and
//! [`JunitRenderer`] turns finished aggregates into a JUnit XML report.

mod aggregator;
mod junit;

pub use aggregator::*;
pub use junit::*;

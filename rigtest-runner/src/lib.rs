// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for the rigtest hardware-in-the-loop harness.
//!
//! rigtest executes test cases against consumer audio/video devices mounted
//! in a lab rig. This crate contains the harness core: binding named rig
//! resources to roles on a test context, running one test method under a
//! captured log, aggregating pass/fail/error outcomes, and shipping logs and
//! artifacts to an intermittently available store.
//!
//! Device-facing clients, concrete test scenarios and CLI drivers live
//! outside this crate and talk to it through the [`resource::DeviceResource`]
//! and [`reporter::RunObserver`] seams.

pub mod config;
pub mod errors;
mod helpers;
pub mod log_sink;
pub mod reporter;
pub mod resource;
pub mod runner;
pub mod spill_queue;
pub mod syslog;
mod time;
pub mod transfer;

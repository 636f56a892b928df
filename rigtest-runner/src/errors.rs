// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by rigtest.

use camino::Utf8PathBuf;
use std::error;
use thiserror::Error;

pub use display_error_chain::DisplayErrorChain;

/// An error that occurred while binding rig resources to a test case.
///
/// Binding errors are always raised before the test method runs and are
/// never retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The resource map handed to the binder was empty.
    #[error("there are no resources for the testcase `{test_id}`")]
    NoResources {
        /// The test case the resources were requested for.
        test_id: String,
    },

    /// More than one resource group was supplied without any roles.
    #[error("there are no roles for the testcase `{test_id}`")]
    NoRoles {
        /// The test case the roles were requested for.
        test_id: String,
    },

    /// A role entry in the requested role list was empty.
    #[error("a role for the testcase `{test_id}` is empty (roles: {roles:?})")]
    EmptyRole {
        /// The test case the roles were requested for.
        test_id: String,

        /// The full role list as supplied.
        roles: Vec<String>,
    },

    /// A requested role matched no resource group.
    #[error("testcase role `{role}` is not found among resource roles {available:?}")]
    RoleNotFound {
        /// The role that could not be resolved.
        role: String,

        /// Every role declared by the supplied resource groups.
        available: Vec<String>,
    },

    /// A resource rejected its post-binding setup call.
    #[error("post-setup of the `{kind}` resource failed")]
    ResourceSetup {
        /// The capability key of the resource.
        kind: crate::resource::ResourceKind,

        /// The underlying resource error.
        #[source]
        error: ResourceError,
    },
}

/// An error that occurred while creating or releasing the local log store.
///
/// Raised synchronously at [`LogSink`](crate::log_sink::LogSink)
/// construction or close; individual `log` calls never raise it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The log directory could not be created.
    #[error("failed to create log directory `{path}`")]
    CreateDir {
        /// The directory being created.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// The log file could not be opened.
    #[error("failed to open log file `{path}`")]
    OpenFile {
        /// The file being opened.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// The log file could not be flushed and closed.
    #[error("failed to close log file `{path}`")]
    Close {
        /// The file being closed.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// The fallback temp directory is not valid UTF-8.
    #[error("system temp directory is not valid UTF-8")]
    NonUtf8TempDir(#[source] camino::FromPathBufError),
}

/// An error that occurred while preparing a test case for execution.
///
/// Setup errors propagate to the runner's caller before the test method
/// runs; partial resource binding never leaves a test silently un-run.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The local log store could not be created.
    #[error("cannot create the test log store")]
    Storage(#[from] StorageError),

    /// Resource or role binding failed.
    #[error("cannot bind rig resources")]
    Configuration(#[from] ConfigurationError),
}

/// An error reported by a device resource operation.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The resource does not implement this operation.
    #[error("operation not supported by this resource")]
    Unsupported,

    /// The resource handle is no longer usable.
    #[error("resource handle is poisoned")]
    Poisoned,

    /// The operation was attempted and failed.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,

        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn error::Error + Send + Sync>>,
    },
}

impl ResourceError {
    /// Creates a new `Failed` error from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        ResourceError::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `Failed` error from a message and an underlying error.
    pub fn failed_with(
        message: impl Into<String>,
        source: impl error::Error + Send + Sync + 'static,
    ) -> Self {
        ResourceError::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// An error produced by an artifact store session.
///
/// Connection-phase errors are retried by
/// [`RetryingTransfer`](crate::transfer::RetryingTransfer); protocol-phase
/// errors abort the single operation without retry.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SessionError {
    message: String,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

impl SessionError {
    /// Creates a new session error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new session error from a message and an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// An error returned by a remote log store while persisting one entry.
///
/// These errors are contained inside the
/// [`LogSink`](crate::log_sink::LogSink) upload worker and never reach the
/// logging caller.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RemoteLogError {
    message: String,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

impl RemoteLogError {
    /// Creates a new remote log error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new remote log error from a message and an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// An error that occurs while writing a JUnit report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JunitWriteError {
    /// An error occurred while creating the output file.
    #[error("error operating on path `{file}`")]
    Fs {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while producing JUnit XML.
    #[error("error writing JUnit output to `{file}`")]
    Junit {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error that occurred while loading the rig environment configuration.
#[derive(Debug, Error)]
#[error("failed to load rig environment{}", display_path(.path))]
pub struct EnvironmentLoadError {
    pub(crate) path: Option<Utf8PathBuf>,
    #[source]
    pub(crate) error: config::ConfigError,
}

fn display_path(path: &Option<Utf8PathBuf>) -> String {
    match path {
        Some(path) => format!(" from `{path}`"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_renders_all_causes() {
        let inner = std::io::Error::other("disk on fire");
        let outer = SessionError::with_source("upload failed", inner);
        let rendered = DisplayErrorChain::new(&outer).to_string();
        assert!(
            rendered.starts_with("upload failed"),
            "chain leads with the top-level error: {rendered}"
        );
        assert!(
            rendered.contains("disk on fire"),
            "chain carries the root cause: {rendered}"
        );
    }

    #[test]
    fn error_chain_single_error() {
        let error = SessionError::new("connection refused");
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "connection refused"
        );
    }
}

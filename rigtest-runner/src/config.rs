// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The lab environment configuration consumed by drivers.
//!
//! The harness core never opens network connections itself; drivers read a
//! [`RigEnvironment`] and construct artifact-store and mail clients from
//! it. Values come from built-in defaults, an optional TOML file, and
//! `RIGTEST_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `RIGTEST_FTP__HOST`), later sources winning.

use crate::errors::EnvironmentLoadError;
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// The prefix environment-variable overrides use.
pub const ENV_PREFIX: &str = "RIGTEST";

const DEFAULT_CONFIG: &str = r#"
[ftp]
host = ""
username = ""
password = ""
log_root = "/logs"

[smtp]
host = ""
port = 25
notifier = ""
"#;

/// Everything a driver needs to reach the lab's external services.
#[derive(Clone, Debug, Deserialize)]
pub struct RigEnvironment {
    /// The artifact store logs and reports are uploaded to.
    pub ftp: FtpEnvironment,
    /// The mail relay run notifications go through.
    pub smtp: SmtpEnvironment,
}

/// Connection settings for the artifact store.
#[derive(Clone, Debug, Deserialize)]
pub struct FtpEnvironment {
    /// Server host name or address.
    pub host: String,
    /// Account user name.
    pub username: String,
    /// Account password.
    pub password: String,
    /// The remote root all test-run folders are created below.
    pub log_root: Utf8PathBuf,
    /// Connection timeout for directory-creation actions.
    #[serde(default = "default_dir_connect_timeout", with = "humantime_serde")]
    pub dir_connect_timeout: Duration,
    /// Connection timeout for file-upload actions.
    #[serde(default = "default_upload_connect_timeout", with = "humantime_serde")]
    pub upload_connect_timeout: Duration,
}

/// Connection settings for the mail relay.
#[derive(Clone, Debug, Deserialize)]
pub struct SmtpEnvironment {
    /// Relay host name or address.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// The address run notifications are sent from.
    pub notifier: String,
}

impl RigEnvironment {
    /// Loads the environment from defaults, then `path` (if given), then
    /// `RIGTEST_`-prefixed environment variables.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, EnvironmentLoadError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(File::new(path.as_str(), FileFormat::Toml));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|error| EnvironmentLoadError {
                path: path.map(Utf8Path::to_owned),
                error,
            })
    }
}

fn default_dir_connect_timeout() -> Duration {
    crate::transfer::DIR_CONNECT_TIMEOUT
}

fn default_upload_connect_timeout() -> Duration {
    crate::transfer::FILE_CONNECT_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_load_without_a_file() {
        let environment = RigEnvironment::load(None).unwrap();
        assert_eq!(environment.ftp.log_root, Utf8PathBuf::from("/logs"));
        assert_eq!(environment.smtp.port, 25);
        assert_eq!(
            environment.ftp.dir_connect_timeout,
            Duration::from_secs(60)
        );
        assert_eq!(
            environment.ftp.upload_connect_timeout,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("rig-env.toml");
        fs_err::write(
            &path,
            indoc! {r#"
                [ftp]
                host = "artifacts.lab.example.com"
                username = "rig"
                password = "hunter2"
                log_root = "/srv/testlogs"
                dir_connect_timeout = "30s"

                [smtp]
                host = "mail.lab.example.com"
                port = 587
                notifier = "rig-notifier@example.com"
            "#},
        )
        .unwrap();

        let environment = RigEnvironment::load(Some(&path)).unwrap();
        assert_eq!(environment.ftp.host, "artifacts.lab.example.com");
        assert_eq!(environment.ftp.log_root, Utf8PathBuf::from("/srv/testlogs"));
        assert_eq!(environment.ftp.dir_connect_timeout, Duration::from_secs(30));
        assert_eq!(
            environment.ftp.upload_connect_timeout,
            Duration::from_secs(300),
            "unset timeout keeps its default"
        );
        assert_eq!(environment.smtp.port, 587);
        assert_eq!(environment.smtp.notifier, "rig-notifier@example.com");
    }

    #[test]
    fn unreadable_file_reports_the_path() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs_err::write(&path, "[ftp\nhost =").unwrap();

        let error = RigEnvironment::load(Some(&path)).unwrap_err();
        assert!(error.to_string().contains("broken.toml"));
    }
}

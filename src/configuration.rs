//! The user's runtime configuration.
//!
//! The configuration is loaded from the file `configuration.toml` in the current directory, or
//! from the file given on the command line. Every configuration option has a default value,
//! allowing to run without a configuration file. A configuration file given explicitly must exist.

use config::Config;
use config::ConfigError;
use config::File;
use config::FileFormat;
use crate::task::DEFAULT_ENDPOINT;
use serde::Deserialize;
use validator::Validate;

const DEFAULT_PATH: &str = "configuration.toml";

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// Renewal settings of the VOMS proxy.
#[derive(Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Proxy {
    #[validate(length(min = 1))]
    pub voms: String,
    /// Minimum remaining lifetime of the proxy, in seconds, before any remote operation.
    pub minimum_lifetime: u64,
    /// Validity requested on renewals, as `hours:minutes`.
    #[validate(length(min = 1))]
    pub validity: String,
    /// A file containing the passphrase of the user's certificate. When missing, the passphrase
    /// is prompted on renewals.
    pub passphrase_file: Option<String>,
}
impl Default for Proxy {
    fn default() -> Self {
        Self {
            voms: String::from("cms:/cms/dcms"),
            minimum_lifetime: 604800,
            validity: String::from("192:00"),
            passphrase_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Submission {
    /// Maximum number of submission attempts while the compute element is busy.
    #[validate(range(min = 1))]
    pub attempts: u32,
    /// Base delay between attempts, in seconds. The n-th retry waits n times this delay.
    pub backoff: u64,
    /// Number of worker threads used for bulk operations, 0 to run them sequentially.
    pub parallelism: usize,
}
impl Default for Submission {
    fn default() -> Self {
        Self {
            attempts: 50,
            backoff: 60,
            parallelism: 0,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Batch {
    /// Maximum number of jobs in a single status or output call.
    #[validate(range(min = 1))]
    pub size: usize,
    /// Number of parallel connections used to transfer outputs.
    #[validate(range(min = 1))]
    pub connections: u32,
}
impl Default for Batch {
    fn default() -> Self {
        Self {
            size: 100,
            connections: 1,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Ce {
    /// The compute element endpoint jobs are sent to, unless the task says otherwise.
    #[validate(length(min = 1))]
    pub endpoint: String,
}
impl Default for Ce {
    fn default() -> Self {
        Self {
            endpoint: String::from(DEFAULT_ENDPOINT),
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    #[validate]
    pub proxy: Proxy,
    #[serde(default)]
    #[validate]
    pub submission: Submission,
    #[serde(default)]
    #[validate]
    pub batch: Batch,
    #[serde(default)]
    #[validate]
    pub ce: Ce,
}

impl Configuration {
    /// Load the configuration from the given file, or from `configuration.toml` when no file is
    /// given. It returns a validated configuration tree in case of success, or a message
    /// describing the error in case of error.
    pub fn new(path: Option<&str>) -> Result<Self, String> {
        let configuration = match Self::load(path) {
            Ok(configuration) => configuration,
            Err(error) => return Err(error.to_string()),
        };

        match configuration.validate() {
            Ok(()) => Ok(configuration),
            Err(errors) => Err(errors.to_string()),
        }
    }

    fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut configuration = Config::default();

        let file =
            File::with_name(path.unwrap_or(DEFAULT_PATH))
            .format(FileFormat::Toml)
            .required(path.is_some())
        ;
        configuration.merge(file)?;

        configuration.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn load(content: &str) -> Result<Configuration, String> {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("cesubmit.toml");
        fs::write(&path, content).unwrap();

        Configuration::new(path.to_str())
    }

    #[test]
    fn defaults() {
        let configuration = load("").unwrap();

        assert_eq!(configuration.log.level, LogLevel::Info);
        assert_eq!(configuration.proxy.voms, "cms:/cms/dcms");
        assert_eq!(configuration.proxy.minimum_lifetime, 604800);
        assert_eq!(configuration.submission.attempts, 50);
        assert_eq!(configuration.submission.backoff, 60);
        assert_eq!(configuration.batch.size, 100);
        assert_eq!(configuration.ce.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn partial_file() {
        let configuration = load("[log]\nlevel = \"debug\"\n\n[batch]\nsize = 20\n").unwrap();

        assert_eq!(configuration.log.level, LogLevel::Debug);
        assert_eq!(configuration.batch.size, 20);
        assert_eq!(configuration.batch.connections, 1);
    }

    #[test]
    fn invalid_values() {
        assert!(load("[submission]\nattempts = 0\n").is_err());
        assert!(load("[ce]\nendpoint = \"\"\n").is_err());
        assert!(load("[log]\nlevel = \"verbose\"\n").is_err());
    }

    #[test]
    fn missing_explicit_file() {
        assert!(Configuration::new(Some("/nonexistent/cesubmit.toml")).is_err());
    }
}

//! Management of the VOMS proxy, the delegated credential required by every grid operation.
//!
//! The remaining lifetime of the proxy is read with `voms-proxy-info -timeleft`. When it falls
//! below the requested minimum, a new proxy is created with `voms-proxy-init`, either letting the
//! tool prompt the user for the passphrase, or feeding a configured passphrase on its standard
//! input. A renewal that doesn't provide a long enough lifetime is fatal.

use crate::remote::{Executor, Invocation};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
pub enum CredentialError {
    /// The renewal tool couldn't be run or exited with a failure, with its output.
    RenewalFailure(String),
    /// The proxy has been renewed, but its lifetime is still below the requested minimum.
    InsufficientLifetime { remaining: u64, minimum: u64 },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenewalFailure(output) => write!(formatter, "proxy initialization command failed: {}", output.trim()),
            Self::InsufficientLifetime { remaining, minimum } => write!(
                formatter,
                "proxy still not valid long enough ({} seconds left, {} required)",
                remaining,
                minimum,
            ),
        }
    }
}

/// Settings of proxy renewals.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub voms: String,
    pub validity: String,
    pub minimum_lifetime: u64,
    pub passphrase: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voms: String::from("cms:/cms/dcms"),
            validity: String::from("192:00"),
            minimum_lifetime: 604800,
            passphrase: None,
        }
    }
}

pub struct ProxyManager {
    executor: Arc<dyn Executor>,
    settings: Settings,
}

impl ProxyManager {
    /// Create a new proxy manager running the VOMS tools with the given executor.
    pub fn new(executor: Arc<dyn Executor>, settings: Settings) -> Self {
        Self {
            executor,
            settings,
        }
    }

    /// Get the minimum lifetime (in seconds) required before any remote operation.
    pub fn get_minimum_lifetime(&self) -> u64 {
        self.settings.minimum_lifetime
    }

    /// Get the remaining lifetime of the current proxy, in seconds. A missing proxy, or a tool
    /// failure, counts as no lifetime at all.
    pub fn time_left(&self) -> u64 {
        match self.executor.run(&Invocation::new("voms-proxy-info").arg("-timeleft")) {
            Ok(completed) if completed.success() => completed.stdout.trim().parse().unwrap_or(0),
            Ok(completed) => {
                debug!("'voms-proxy-info' exited with code {:?}: {}", completed.code, completed.stdout.trim());
                0
            },
            Err(error) => {
                warn!("Unable to run 'voms-proxy-info': {}.", error);
                0
            },
        }
    }

    /// Make sure the proxy remains valid for more than the given number of seconds, renewing it
    /// if needed. This call may block, waiting for the user to type the passphrase.
    pub fn ensure_valid(&self, minimum: u64) -> Result<(), CredentialError> {
        debug!("Checking the proxy lifetime.");
        if self.time_left() > minimum {
            return Ok(());
        };

        info!("Renewing the proxy for '{}'.", self.settings.voms);
        self.renew()?;

        let remaining = self.time_left();
        match remaining > minimum {
            true => Ok(()),
            false => Err(CredentialError::InsufficientLifetime { remaining, minimum }),
        }
    }

    fn renew(&self) -> Result<(), CredentialError> {
        let invocation = Invocation::new("voms-proxy-init")
            .args(vec!["--voms", self.settings.voms.as_str(), "--valid", self.settings.validity.as_str()])
        ;
        let invocation = match &self.settings.passphrase {
            Some(passphrase) => invocation.input(format!("{}\n", passphrase)),
            None => invocation.interactive(),
        };

        match self.executor.run(&invocation) {
            Ok(completed) if completed.success() => Ok(()),
            Ok(completed) => Err(CredentialError::RenewalFailure(completed.stdout)),
            Err(error) => Err(CredentialError::RenewalFailure(error.to_string())),
        }
    }
}

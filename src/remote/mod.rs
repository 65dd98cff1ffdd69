//! Access to the remote grid services.
//!
//! The [`Service`] trait is the only boundary between the job lifecycle and the compute element.
//! It exposes typed outcomes only: textual outputs of the command line tools are parsed and
//! classified by implementations (see [`Cream`]), never by callers. A [`Remote`] bundles a service
//! with the credential gate and the retry policy used by job operations.

mod classifier;
mod cream;
mod executor;
mod parser;
mod retry;
mod status;
#[cfg(test)]
pub mod testing;

use crate::proxy::{CredentialError, ProxyManager};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

pub use classifier::{Busy, Submission};
pub use cream::Cream;
pub use executor::{Completed, Executor, Invocation, System};
pub use retry::{Policy, Sleeper, ThreadSleeper};
pub use status::{Infos, RemoteStatus, Transition};

/// A failed remote command, with its exit code (when it exited) and its output.
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub code: Option<i32>,
    pub output: String,
}

impl Failure {
    /// Create a new failure.
    pub fn new(code: Option<i32>, output: &str) -> Self {
        Self {
            code,
            output: output.to_string(),
        }
    }
}

/// The operations offered by a compute element.
pub trait Service: Send + Sync {
    /// Submit the given job descriptor to the given endpoint, from the given directory.
    fn submit(&self, endpoint: &str, descriptor: &Path, directory: &Path) -> Submission;
    /// Query the status of a single job.
    fn status(&self, jobid: &str) -> Result<Infos, Failure>;
    /// Query the status of many jobs at once, including their status history. Jobs unknown to
    /// the compute element are absent from the result.
    fn statuses(&self, jobids: &[String]) -> Result<HashMap<String, Infos>, Failure>;
    /// Fetch the output sandboxes of the given jobs into the given directory, returning the
    /// identifiers of jobs confirmed as fetched.
    fn output(&self, jobids: &[String], directory: &Path, connections: u32) -> Result<HashSet<String>, Failure>;
    /// Cancel a job.
    fn cancel(&self, jobid: &str) -> Result<(), Failure>;
    /// Delete the records of a job from the compute element.
    fn purge(&self, jobid: &str) -> Result<(), Failure>;
}

/// Everything needed by job operations to talk to the compute element.
#[derive(Clone)]
pub struct Remote {
    service: Arc<dyn Service>,
    proxy: Option<Arc<ProxyManager>>,
    policy: Policy,
    sleeper: Arc<dyn Sleeper>,
    batch_size: usize,
}

impl Remote {
    /// Create a new remote, checking the credential with the given proxy manager before each
    /// submission, status or output call.
    pub fn new(service: Arc<dyn Service>, proxy: Option<Arc<ProxyManager>>, policy: Policy, sleeper: Arc<dyn Sleeper>, batch_size: usize) -> Self {
        Self {
            service,
            proxy,
            policy,
            sleeper,
            batch_size: batch_size.max(1),
        }
    }

    /// Create a copy of this remote for pool workers. Workers never renew the credential: the
    /// parent makes sure it is valid before dispatching them.
    pub fn detached(&self) -> Self {
        Self {
            proxy: None,
            ..self.clone()
        }
    }

    /// Make sure the credential is valid long enough, renewing it if needed.
    pub fn authorize(&self) -> Result<(), CredentialError> {
        match &self.proxy {
            Some(proxy) => proxy.ensure_valid(proxy.get_minimum_lifetime()),
            None => Ok(()),
        }
    }

    /// Get the service.
    pub fn service(&self) -> &dyn Service {
        self.service.as_ref()
    }

    /// Get the retry policy of submissions.
    pub fn get_policy(&self) -> &Policy {
        &self.policy
    }

    /// Get the sleeper used between submission attempts.
    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Get the maximum number of jobs sent in a single batched call.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }
}

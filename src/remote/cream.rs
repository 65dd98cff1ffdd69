use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use super::classifier::{classify_submission, Submission};
use super::executor::{Completed, Executor, Invocation};
use super::parser::{parse_retrieved, parse_status, parse_statuses};
use super::status::Infos;
use super::{Failure, Service};

/// A service driving a CREAM compute element through the `glite-ce-*` command line tools.
pub struct Cream {
    executor: Arc<dyn Executor>,
}

impl Cream {
    /// Create a new CREAM service running its commands with the given executor.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
        }
    }

    /// Run the given invocation, converting a command that can't be started into a failure.
    fn run(&self, invocation: Invocation) -> Result<Completed, Failure> {
        self.executor.run(&invocation).map_err(|error| Failure::new(
            None,
            &format!("unable to run '{}': {}", invocation.get_program(), error),
        ))
    }

    /// Run the given invocation, requiring a successful exit.
    fn run_successfully(&self, invocation: Invocation) -> Result<Completed, Failure> {
        let completed = self.run(invocation)?;

        match completed.success() {
            true => Ok(completed),
            false => Err(Failure::new(completed.code, &completed.stdout)),
        }
    }
}

impl Service for Cream {
    fn submit(&self, endpoint: &str, descriptor: &Path, directory: &Path) -> Submission {
        let invocation = Invocation::new("glite-ce-job-submit")
            .args(vec!["-a", "-r", endpoint])
            .arg(descriptor.to_string_lossy())
            .current_dir(directory.to_path_buf())
        ;

        match self.run(invocation) {
            Ok(completed) => classify_submission(&completed),
            Err(failure) => Submission::Rejected(failure.output),
        }
    }

    fn status(&self, jobid: &str) -> Result<Infos, Failure> {
        let completed = self.run_successfully(Invocation::new("glite-ce-job-status").arg(jobid))?;

        Ok(parse_status(&completed.stdout))
    }

    fn statuses(&self, jobids: &[String]) -> Result<HashMap<String, Infos>, Failure> {
        let completed = self.run(Invocation::new("glite-ce-job-status").arg("-L1").args(jobids.iter().cloned()))?;
        // A single unknown identifier makes the whole command fail, while records of all other
        // jobs are still printed.
        if !completed.success() {
            warn!("Status query of {} jobs exited with code {:?}.", jobids.len(), completed.code);
            debug!("{}", completed.stdout);
        };

        Ok(parse_statuses(&completed.stdout))
    }

    fn output(&self, jobids: &[String], directory: &Path, connections: u32) -> Result<HashSet<String>, Failure> {
        let invocation = Invocation::new("glite-ce-job-output")
            .arg("-s")
            .arg(connections.to_string())
            .arg("--noint")
            .arg("--dir")
            .arg(directory.to_string_lossy())
            .args(jobids.iter().cloned())
        ;
        let completed = self.run_successfully(invocation)?;

        Ok(parse_retrieved(&completed.stdout))
    }

    fn cancel(&self, jobid: &str) -> Result<(), Failure> {
        self.run_successfully(Invocation::new("glite-ce-job-cancel").arg("--noint").arg(jobid))?;

        Ok(())
    }

    fn purge(&self, jobid: &str) -> Result<(), Failure> {
        self.run_successfully(Invocation::new("glite-ce-job-purge").arg("--noint").arg(jobid))?;

        Ok(())
    }
}

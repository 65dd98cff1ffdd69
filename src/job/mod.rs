//! Jobs, the units of remote work of a task.
//!
//! A job knows nothing about its task: every operation receives the shared context it needs (the
//! task sandbox, the compute element endpoint and the task directory) from the caller.

pub mod descriptor;

use chrono::DateTime;
use chrono::offset::Utc;
use crate::proxy::CredentialError;
use crate::remote::{Infos, Remote, Submission};
use crate::storage::JobRecord;
use descriptor::Descriptor;
use log::{debug, error, info, warn};
use std::fmt;
use std::fs;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// The locally tracked lifecycle flag of a job.
///
/// A job goes from Unsubmitted to JdlWritten once its descriptor is rendered, then to Sent once
/// accepted by the compute element. Retrieved, Purged, Cancelled and Failed2Retrieve are
/// terminal for the current submission; a resubmission starts a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrontEndStatus {
    Unsubmitted,
    JdlWritten,
    Sent,
    Retrieved,
    Purged,
    Cancelled,
    Failed2Retrieve,
}

impl FrontEndStatus {
    /// Parse a flag label, as returned by `as_str`.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "" => Some(Self::Unsubmitted),
            "JDLWRITTEN" => Some(Self::JdlWritten),
            "SENT" => Some(Self::Sent),
            "RETRIEVED" => Some(Self::Retrieved),
            "PURGED" => Some(Self::Purged),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED2RETRIEVE" => Some(Self::Failed2Retrieve),
            _ => None,
        }
    }

    /// Get the label of this flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubmitted => "",
            Self::JdlWritten => "JDLWRITTEN",
            Self::Sent => "SENT",
            Self::Retrieved => "RETRIEVED",
            Self::Purged => "PURGED",
            Self::Cancelled => "CANCELLED",
            Self::Failed2Retrieve => "FAILED2RETRIEVE",
        }
    }

    /// Check whether the job records are gone from the compute element, so it must not be polled
    /// anymore.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Retrieved | Self::Purged)
    }
}

impl Default for FrontEndStatus {
    fn default() -> Self {
        Self::Unsubmitted
    }
}

impl fmt::Display for FrontEndStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum DescriptorError {
    /// Neither the job nor its task has an executable.
    MissingExecutable(usize),
    Io(IoError),
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingExecutable(nodeid) => write!(formatter, "no executable given for job {}", nodeid),
            Self::Io(error) => write!(formatter, "unable to write the job descriptor: {}", error),
        }
    }
}

impl From<IoError> for DescriptorError {
    fn from(error: IoError) -> Self {
        Self::Io(error)
    }
}

/// The sandbox shared by all jobs of a task.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sandbox {
    pub executable: Option<String>,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
}

/// Where the jobs of a task are sent: the compute element endpoint, and the task directory
/// submissions are made from and outputs are retrieved into.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub endpoint: String,
    pub directory: PathBuf,
}

/// Get the output subdirectory of the job with the given identifier: the identifier without its
/// scheme, `:` and `/` replaced by `_`.
pub fn output_subdirectory(jobid: &str) -> String {
    let path = jobid.strip_prefix("https://").unwrap_or(jobid);

    path.replace(':', "_").replace('/', "_")
}

/// Everything a remote operation may change on a job. Pool workers operate on copies of jobs, and
/// send back outcomes to be applied on the original jobs.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    jobid: Option<String>,
    status: FrontEndStatus,
    infos: Infos,
    error: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    nodeid: Option<usize>,
    jobid: Option<String>,
    executable: Option<String>,
    input_files: Vec<String>,
    output_files: Vec<String>,
    arguments: Vec<String>,
    status: FrontEndStatus,
    infos: Infos,
    error: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new unsubmitted job, running the task executable with the given arguments.
    pub fn new(arguments: Vec<String>) -> Self {
        Self {
            nodeid: None,
            jobid: None,
            executable: None,
            input_files: Vec::new(),
            output_files: Vec::new(),
            arguments,
            status: FrontEndStatus::Unsubmitted,
            infos: Infos::new(),
            error: None,
            submitted_at: None,
        }
    }

    /// Run the given executable instead of the task one.
    pub fn with_executable(mut self, executable: String) -> Self {
        self.executable = Some(executable);
        self
    }

    /// Ship the given files along with the task input files.
    pub fn with_input_files(mut self, input_files: Vec<String>) -> Self {
        self.input_files = input_files;
        self
    }

    /// Retrieve the given files along with the task output files.
    pub fn with_output_files(mut self, output_files: Vec<String>) -> Self {
        self.output_files = output_files;
        self
    }

    pub fn get_nodeid(&self) -> Option<usize> {
        self.nodeid
    }

    pub fn get_jobid(&self) -> Option<&str> {
        self.jobid.as_deref()
    }

    pub fn get_arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Get the local lifecycle flag.
    pub fn get_status(&self) -> FrontEndStatus {
        self.status
    }

    /// Get the last status snapshot reported by the compute element.
    pub fn get_infos(&self) -> &Infos {
        &self.infos
    }

    /// Get the error of the last failed submission.
    pub fn get_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn get_submitted_at(&self) -> Option<&DateTime<Utc>> {
        self.submitted_at.as_ref()
    }

    /// Get the name of the subdirectory the job output is retrieved into, if the job has been
    /// submitted.
    pub fn output_subdirectory(&self) -> Option<String> {
        self.jobid.as_deref().map(output_subdirectory)
    }

    /// Replace the status snapshot of this job.
    pub fn set_infos(&mut self, infos: Infos) {
        self.infos = infos;
    }

    /// Write the descriptor of this job in the given directory, as the job with the given node
    /// identifier, completing the sandboxes with the task ones.
    pub fn render_descriptor(&mut self, nodeid: usize, sandbox: &Sandbox, directory: &Path) -> Result<PathBuf, DescriptorError> {
        let executable = self.executable.as_ref()
            .or_else(|| sandbox.executable.as_ref())
            .ok_or(DescriptorError::MissingExecutable(nodeid))?
        ;
        let descriptor = Descriptor {
            executable,
            arguments: &self.arguments,
            input_files: self.input_files.iter().chain(&sandbox.input_files).map(String::as_str).collect(),
            output_files: self.output_files.iter().chain(&sandbox.output_files).map(String::as_str).collect(),
        };
        let path = directory.join(descriptor::file_name(nodeid));
        fs::write(&path, descriptor.render())?;
        debug!("Job descriptor written in '{}'.", path.display());

        self.nodeid = Some(nodeid);
        self.status = FrontEndStatus::JdlWritten;

        Ok(path)
    }

    /// Submit this job, retrying while the compute element is busy. A rejected submission is
    /// recorded as the job error; only credential failures are returned.
    pub fn submit(&mut self, remote: &Remote, placement: &Placement) -> Result<(), CredentialError> {
        remote.authorize()?;

        let descriptor = match self.nodeid {
            Some(nodeid) => placement.directory.join(descriptor::file_name(nodeid)),
            None => {
                error!("Unable to submit a job without descriptor.");
                self.error = Some(String::from("no job descriptor rendered"));
                return Ok(());
            },
        };
        let policy = remote.get_policy();

        for attempt in 0..policy.get_attempts() {
            match remote.service().submit(&placement.endpoint, &descriptor, &placement.directory) {
                Submission::Accepted(jobid) => {
                    match &jobid {
                        Some(jobid) => info!("Job {} submitted as '{}'.", descriptor.display(), jobid),
                        None => warn!("Job {} submitted, but no job identifier has been found.", descriptor.display()),
                    };
                    self.jobid = jobid;
                    self.status = FrontEndStatus::Sent;
                    self.error = None;
                    self.submitted_at = Some(Utc::now());
                    return Ok(());
                },
                Submission::Rejected(output) => {
                    warn!("Submission of {} failed: {}", descriptor.display(), output.trim());
                    self.error = Some(output);
                    return Ok(());
                },
                Submission::Busy(reason) => {
                    if attempt + 1 < policy.get_attempts() {
                        let delay = policy.delay(attempt);
                        info!("Compute element busy ({:?}), retrying in {} seconds.", reason, delay.as_secs());
                        remote.sleeper().sleep(delay);
                    };
                },
            };
        }

        error!("Submission of {} failed after {} attempts.", descriptor.display(), policy.get_attempts());
        self.error = Some(format!("compute element still busy after {} attempts", policy.get_attempts()));

        Ok(())
    }

    /// Refresh the status snapshot of this job.
    pub fn update_status(&mut self, remote: &Remote) -> Result<(), CredentialError> {
        if self.status.is_finished() {
            return Ok(());
        };
        let jobid = match &self.jobid {
            Some(jobid) => jobid,
            None => return Ok(()),
        };
        remote.authorize()?;

        match remote.service().status(jobid) {
            Ok(infos) => self.infos = infos,
            Err(failure) => warn!("Unable to get the status of '{}': {}", jobid, failure.output.trim()),
        };

        Ok(())
    }

    /// Retrieve the output of this job into the task directory, then purge it.
    pub fn fetch_output(&mut self, remote: &Remote, placement: &Placement, connections: u32) -> Result<(), CredentialError> {
        let jobid = match &self.jobid {
            Some(jobid) => jobid.clone(),
            None => return Ok(()),
        };
        remote.authorize()?;

        match remote.service().output(&[jobid.clone()], &placement.directory, connections) {
            Ok(retrieved) if retrieved.contains(&jobid) => self.complete_retrieval(remote),
            Ok(_) => warn!("Output of '{}' has not been retrieved.", jobid),
            Err(failure) => warn!("Unable to retrieve the output of '{}': {}", jobid, failure.output.trim()),
        };

        Ok(())
    }

    /// Purge this job once its output has been retrieved.
    pub fn complete_retrieval(&mut self, remote: &Remote) {
        self.purge(remote);
        self.status = FrontEndStatus::Retrieved;
    }

    /// Flag this job as having an output that couldn't be retrieved.
    pub fn fail_retrieval(&mut self) {
        self.status = FrontEndStatus::Failed2Retrieve;
    }

    pub fn cancel(&mut self, remote: &Remote) {
        if let Some(jobid) = &self.jobid {
            match remote.service().cancel(jobid) {
                Ok(()) => self.status = FrontEndStatus::Cancelled,
                Err(failure) => warn!("Unable to cancel '{}': {}", jobid, failure.output.trim()),
            };
        };
    }

    pub fn purge(&mut self, remote: &Remote) {
        if let Some(jobid) = &self.jobid {
            match remote.service().purge(jobid) {
                Ok(()) => self.status = FrontEndStatus::Purged,
                Err(failure) => warn!("Unable to purge '{}': {}", jobid, failure.output.trim()),
            };
        };
    }

    /// Remove this job from the compute element, then submit it again with the same descriptor.
    /// A job without identifier, whose last submission failed, is only submitted.
    pub fn resubmit(&mut self, remote: &Remote, placement: &Placement) -> Result<(), CredentialError> {
        if self.infos.status.as_ref().map_or(false, |status| status.is_active()) {
            self.cancel(remote);
        };
        self.purge(remote);
        self.infos = Infos::new();

        self.submit(remote, placement)
    }

    /// Remove this job from the compute element.
    pub fn kill(&mut self, remote: &Remote) {
        if self.jobid.is_none() {
            return;
        };
        self.cancel(remote);
        self.purge(remote);
        self.infos = Infos::new();
    }

    /// Get the outcome of the last operations on this job.
    pub fn outcome(&self) -> Outcome {
        Outcome {
            jobid: self.jobid.clone(),
            status: self.status,
            infos: self.infos.clone(),
            error: self.error.clone(),
            submitted_at: self.submitted_at,
        }
    }

    /// Apply the outcome of operations made on a copy of this job.
    pub fn apply(&mut self, outcome: Outcome) {
        self.jobid = outcome.jobid;
        self.status = outcome.status;
        self.infos = outcome.infos;
        self.error = outcome.error;
        self.submitted_at = outcome.submitted_at;
    }
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            nodeid: job.nodeid,
            jobid: job.jobid.clone(),
            executable: job.executable.clone(),
            input_files: job.input_files.clone(),
            output_files: job.output_files.clone(),
            arguments: job.arguments.clone(),
            status: job.status,
            infos: job.infos.clone(),
            error: job.error.clone(),
            submitted_at: job.submitted_at,
        }
    }
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Self {
            nodeid: record.nodeid,
            jobid: record.jobid,
            executable: record.executable,
            input_files: record.input_files,
            output_files: record.output_files,
            arguments: record.arguments,
            status: record.status,
            infos: record.infos,
            error: record.error,
            submitted_at: record.submitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{remote, Call, FakeCompute, RecordingSleeper};
    use crate::remote::{Busy, RemoteStatus};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (Arc<FakeCompute>, Arc<RecordingSleeper>, Remote, TempDir) {
        let compute = Arc::new(FakeCompute::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let remote = remote(&compute, &sleeper);

        (compute, sleeper, remote, tempfile::tempdir().unwrap())
    }

    fn placement(directory: &TempDir) -> Placement {
        Placement {
            endpoint: String::from("ce1:8443/cream-pbs-cms"),
            directory: directory.path().to_path_buf(),
        }
    }

    fn sandbox() -> Sandbox {
        Sandbox {
            executable: Some(String::from("run.sh")),
            ..Sandbox::default()
        }
    }

    fn submitted_job(remote: &Remote, directory: &TempDir) -> Job {
        let mut job = Job::new(vec![String::from("1")]);
        job.render_descriptor(0, &sandbox(), directory.path()).unwrap();
        job.submit(remote, &placement(directory)).unwrap();

        job
    }

    #[test]
    fn render_descriptor_with_task_sandbox() {
        let directory = tempfile::tempdir().unwrap();
        let sandbox = Sandbox {
            executable: Some(String::from("run.sh")),
            input_files: vec![String::from("shared.txt")],
            output_files: vec![String::from("result.root")],
        };
        let mut job = Job::new(vec![String::from("7")]).with_input_files(vec![String::from("own.txt")]);

        let path = job.render_descriptor(3, &sandbox, directory.path()).unwrap();

        assert_eq!(path, directory.path().join("job3.jdl"));
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("InputSandbox = { \"./prologue.sh\", \"run.sh\", \"own.txt\", \"shared.txt\" };"));
        assert!(content.contains("OutputSandbox = { \"out.txt\", \"err.txt\", \"result.root\" };"));
        assert!(content.contains("Arguments = \"./run.sh 7\";"));
        assert_eq!(job.get_nodeid(), Some(3));
        assert_eq!(job.get_status(), FrontEndStatus::JdlWritten);
    }

    #[test]
    fn render_descriptor_without_executable() {
        let directory = tempfile::tempdir().unwrap();
        let mut job = Job::new(vec![]);

        match job.render_descriptor(0, &Sandbox::default(), directory.path()) {
            Err(DescriptorError::MissingExecutable(0)) => {},
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(job.get_status(), FrontEndStatus::Unsubmitted);
    }

    #[test]
    fn submit_retries_busy_compute_element() {
        let (compute, sleeper, remote, directory) = setup();
        compute.script_submissions(vec![
            Submission::Busy(Busy::SubmissionsDisabled),
            Submission::Busy(Busy::SubmissionsDisabled),
            Submission::Accepted(Some(String::from("https://ce1:8443/CREAM42"))),
        ]);

        let job = submitted_job(&remote, &directory);

        assert_eq!(job.get_jobid(), Some("https://ce1:8443/CREAM42"));
        assert_eq!(job.get_status(), FrontEndStatus::Sent);
        assert!(job.get_submitted_at().is_some());
        assert_eq!(sleeper.durations(), vec![Duration::from_secs(60), Duration::from_secs(120)]);
        assert_eq!(compute.calls().len(), 3);
    }

    #[test]
    fn rejected_submission_is_recorded() {
        let (compute, sleeper, remote, directory) = setup();
        compute.script_submissions(vec![Submission::Rejected(String::from("ERROR - bad descriptor\n"))]);

        let job = submitted_job(&remote, &directory);

        assert_eq!(job.get_jobid(), None);
        assert_eq!(job.get_status(), FrontEndStatus::JdlWritten);
        assert_eq!(job.get_error(), Some("ERROR - bad descriptor\n"));
        assert!(sleeper.durations().is_empty());
    }

    #[test]
    fn exhausted_submission_attempts() {
        let (compute, sleeper, remote, directory) = setup();
        compute.script_submissions(vec![Submission::Busy(Busy::JobRegister); 50]);

        let job = submitted_job(&remote, &directory);

        assert_eq!(job.get_status(), FrontEndStatus::JdlWritten);
        assert!(job.get_error().is_some());
        assert_eq!(compute.calls().len(), 50);
        assert_eq!(sleeper.durations().len(), 49);
        assert_eq!(sleeper.durations()[48], Duration::from_secs(60 * 49));
    }

    #[test]
    fn operations_without_jobid_are_noops() {
        let (compute, _, remote, directory) = setup();
        let mut job = Job::new(vec![]);

        job.cancel(&remote);
        job.purge(&remote);
        job.kill(&remote);
        job.update_status(&remote).unwrap();
        job.fetch_output(&remote, &placement(&directory), 1).unwrap();

        assert!(compute.calls().is_empty());
        assert_eq!(job.get_status(), FrontEndStatus::Unsubmitted);
    }

    #[test]
    fn resubmit_after_rejected_submission() {
        let (compute, _, remote, directory) = setup();
        compute.script_submissions(vec![Submission::Rejected(String::from("ERROR - transient\n"))]);
        let mut job = submitted_job(&remote, &directory);
        assert_eq!(job.get_jobid(), None);
        compute.clear_calls();

        job.resubmit(&remote, &placement(&directory)).unwrap();

        assert_eq!(compute.calls(), vec![Call::Submit(String::from("job0.jdl"))]);
        assert_eq!(job.get_jobid(), Some("https://ce.test:8443/CREAM1"));
        assert_eq!(job.get_status(), FrontEndStatus::Sent);
        assert_eq!(job.get_error(), None);
    }

    #[test]
    fn update_status_replaces_infos() {
        let (compute, _, remote, directory) = setup();
        let mut job = submitted_job(&remote, &directory);
        compute.set_status("https://ce.test:8443/CREAM1", RemoteStatus::DoneOk, Some(0));

        job.update_status(&remote).unwrap();
        assert_eq!(job.get_infos().status, Some(RemoteStatus::DoneOk));
        assert_eq!(job.get_infos().exit_code, Some(0));

        compute.set_failing(true);
        job.update_status(&remote).unwrap();
        assert_eq!(job.get_infos().status, Some(RemoteStatus::DoneOk));
    }

    #[test]
    fn finished_jobs_are_not_polled() {
        let (compute, _, remote, directory) = setup();
        let mut job = submitted_job(&remote, &directory);
        job.purge(&remote);
        compute.clear_calls();

        job.update_status(&remote).unwrap();

        assert!(compute.calls().is_empty());
    }

    #[test]
    fn resubmit_running_job_cancels_first() {
        let (compute, _, remote, directory) = setup();
        let mut job = submitted_job(&remote, &directory);
        compute.set_status("https://ce.test:8443/CREAM1", RemoteStatus::Running, None);
        job.update_status(&remote).unwrap();
        compute.clear_calls();

        job.resubmit(&remote, &placement(&directory)).unwrap();

        assert_eq!(compute.calls(), vec![
            Call::Cancel(String::from("https://ce.test:8443/CREAM1")),
            Call::Purge(String::from("https://ce.test:8443/CREAM1")),
            Call::Submit(String::from("job0.jdl")),
        ]);
        assert_eq!(job.get_jobid(), Some("https://ce.test:8443/CREAM2"));
        assert_eq!(job.get_status(), FrontEndStatus::Sent);
        assert!(job.get_infos().is_empty());
    }

    #[test]
    fn resubmit_done_job_skips_cancel() {
        let (compute, _, remote, directory) = setup();
        let mut job = submitted_job(&remote, &directory);
        compute.set_status("https://ce.test:8443/CREAM1", RemoteStatus::DoneOk, Some(1));
        job.update_status(&remote).unwrap();
        compute.clear_calls();

        job.resubmit(&remote, &placement(&directory)).unwrap();

        assert_eq!(compute.calls(), vec![
            Call::Purge(String::from("https://ce.test:8443/CREAM1")),
            Call::Submit(String::from("job0.jdl")),
        ]);
    }

    #[test]
    fn fetch_output() {
        let (compute, _, remote, directory) = setup();
        let mut job = submitted_job(&remote, &directory);

        job.fetch_output(&remote, &placement(&directory), 2).unwrap();

        assert_eq!(job.get_status(), FrontEndStatus::Retrieved);
        assert_eq!(compute.calls()[2], Call::Purge(String::from("https://ce.test:8443/CREAM1")));
    }

    #[test]
    fn failed_fetch_output_keeps_flag() {
        let (compute, _, remote, directory) = setup();
        let mut job = submitted_job(&remote, &directory);
        compute.set_unretrievable("https://ce.test:8443/CREAM1");

        job.fetch_output(&remote, &placement(&directory), 1).unwrap();

        assert_eq!(job.get_status(), FrontEndStatus::Sent);
    }

    #[test]
    fn outcome_is_applied() {
        let (_, _, remote, directory) = setup();
        let mut original = Job::new(vec![]);
        original.render_descriptor(0, &sandbox(), directory.path()).unwrap();
        let mut copy = original.clone();
        copy.submit(&remote, &placement(&directory)).unwrap();

        original.apply(copy.outcome());

        assert_eq!(original, copy);
    }

    #[test]
    fn output_subdirectories() {
        assert_eq!(output_subdirectory("https://ce1.example.org:8443/CREAM123"), "ce1.example.org_8443_CREAM123");
        assert_eq!(Job::new(vec![]).output_subdirectory(), None);
    }
}

//! Tasks, the batches of jobs sharing a directory, a compute element and an executable.
//!
//! A task drives its jobs through their lifecycle: it submits them, polls their status by
//! batches, retrieves their outputs by batches, and resubmits or kills subsets of them. Every
//! operation changing the task is followed by a new snapshot of the task in its directory (see
//! `storage`), so it can be reopened and resumed later.

mod dispatch;
pub mod prologue;

use crate::job::{DescriptorError, FrontEndStatus, Job, Placement, Sandbox};
use crate::proxy::CredentialError;
use crate::remote::{Remote, RemoteStatus};
use crate::storage::{LoadError, PersistError, Store, TaskRecord};
use dispatch::{dispatch, DispatchError, Operation};
use log::{debug, error, info, warn};
use prologue::Environment;
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fmt;
use std::fs;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "grid-ce.physik.rwth-aachen.de:8443/cream-pbs-cms";
const BACKUP_DIRECTORY: &str = "bak";

/// How the task directory is handled on submission.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    /// Destroy the directory if it exists, then create it.
    Recreate,
    /// Create the directory, failing if it already exists.
    Create,
    /// The task has been loaded from its directory.
    Open,
}

/// The aggregated lifecycle flag of a task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TaskStatus {
    Unsubmitted,
    Submitted,
    Running,
    Done,
    Retrieved,
    Purged,
}

impl TaskStatus {
    /// Parse a flag label, as returned by `as_str`.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "" => Some(Self::Unsubmitted),
            "SUBMITTED" => Some(Self::Submitted),
            "RUNNING" => Some(Self::Running),
            "DONE" => Some(Self::Done),
            "RETRIEVED" => Some(Self::Retrieved),
            "PURGED" => Some(Self::Purged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubmitted => "",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Retrieved => "RETRIEVED",
            Self::Purged => "PURGED",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Unsubmitted
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum TaskError {
    /// The task directory already exists, and the mode doesn't allow to overwrite it.
    DirectoryExists(PathBuf),
    Io(IoError),
    Descriptor(DescriptorError),
    Credential(CredentialError),
    Persist(PersistError),
    Load(LoadError),
    /// A worker thread couldn't be started.
    Worker(IoError),
}

impl fmt::Display for TaskError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectoryExists(path) => write!(formatter, "directory '{}' already exists", path.display()),
            Self::Io(error) => write!(formatter, "{}", error),
            Self::Descriptor(error) => write!(formatter, "{}", error),
            Self::Credential(error) => write!(formatter, "{}", error),
            Self::Persist(error) => write!(formatter, "{}", error),
            Self::Load(error) => write!(formatter, "{}", error),
            Self::Worker(error) => write!(formatter, "unable to start a worker: {}", error),
        }
    }
}

impl From<IoError> for TaskError {
    fn from(error: IoError) -> Self {
        Self::Io(error)
    }
}

impl From<DescriptorError> for TaskError {
    fn from(error: DescriptorError) -> Self {
        Self::Descriptor(error)
    }
}

impl From<CredentialError> for TaskError {
    fn from(error: CredentialError) -> Self {
        Self::Credential(error)
    }
}

impl From<PersistError> for TaskError {
    fn from(error: PersistError) -> Self {
        Self::Persist(error)
    }
}

impl From<LoadError> for TaskError {
    fn from(error: LoadError) -> Self {
        Self::Load(error)
    }
}

impl From<DispatchError> for TaskError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Credential(error) => Self::Credential(error),
            DispatchError::Spawn(error) => Self::Worker(error),
        }
    }
}

/// Counts of the jobs of a task, by status.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    /// Jobs by remote status, `None` for jobs without known status.
    pub remote: BTreeMap<String, usize>,
    /// Jobs by local lifecycle flag.
    pub local: BTreeMap<String, usize>,
    /// Jobs done with a zero exit code.
    pub good: usize,
    /// Jobs aborted, failed, or done with a non zero exit code.
    pub bad: usize,
    pub total: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(formatter, "Remote status:")?;
        for (status, count) in &self.remote {
            writeln!(formatter, "  {:<16} {}", status, count)?;
        }
        writeln!(formatter, "Local status:")?;
        for (status, count) in &self.local {
            let status = if status.is_empty() { "UNSUBMITTED" } else { status.as_str() };
            writeln!(formatter, "  {:<16} {}", status, count)?;
        }
        write!(formatter, "Good: {}, bad: {}, total: {}", self.good, self.bad, self.total)
    }
}

pub struct Task {
    name: String,
    directory: PathBuf,
    endpoint: String,
    environment: Environment,
    sandbox: Sandbox,
    mode: Mode,
    status: TaskStatus,
    jobs: Vec<Job>,
    remote: Remote,
    store: Store,
}

impl Task {
    /// Create a new task, without jobs, in the given directory (relative to the current
    /// directory, unless absolute).
    pub fn new(name: String, directory: &Path, mode: Mode, remote: Remote) -> Self {
        let directory = absolute(directory);

        Self {
            name,
            store: Store::new(directory.clone()),
            directory,
            endpoint: String::from(DEFAULT_ENDPOINT),
            environment: Environment::default(),
            sandbox: Sandbox::default(),
            mode,
            status: TaskStatus::Unsubmitted,
            jobs: Vec::new(),
            remote,
        }
    }

    /// Send the jobs to the given compute element endpoint.
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Run the jobs in the given environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Share the given sandbox between all jobs.
    pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Load the task saved in the given directory.
    pub fn load(directory: &Path, remote: Remote) -> Result<Self, TaskError> {
        let directory = absolute(directory);
        let store = Store::new(directory.clone());
        let record = store.load()?;
        info!("Task '{}' loaded from '{}' with {} jobs.", record.name, directory.display(), record.jobs.len());

        Ok(Self {
            name: record.name,
            directory,
            endpoint: record.endpoint.unwrap_or_else(|| String::from(DEFAULT_ENDPOINT)),
            environment: Environment {
                architecture: record.architecture,
                runtime: record.runtime,
            },
            sandbox: Sandbox {
                executable: record.executable,
                input_files: record.input_files,
                output_files: record.output_files,
            },
            mode: Mode::Open,
            status: record.status,
            jobs: record.jobs.into_iter().map(Job::from).collect(),
            remote,
            store,
        })
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_directory(&self) -> &Path {
        &self.directory
    }

    pub fn get_mode(&self) -> Mode {
        self.mode
    }

    /// Get the aggregated lifecycle flag.
    pub fn get_status(&self) -> TaskStatus {
        self.status
    }

    pub fn get_jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    /// Create the task directory, write the job descriptors, then submit every job.
    pub fn submit(&mut self, parallelism: usize) -> Result<(), TaskError> {
        if self.jobs.is_empty() {
            error!("Task '{}' has no jobs to submit.", self.name);
            return Ok(());
        };
        self.create_directory()?;
        prologue::write(&self.directory, &self.environment)?;
        self.remote.authorize()?;

        for (nodeid, job) in self.jobs.iter_mut().enumerate() {
            job.render_descriptor(nodeid, &self.sandbox, &self.directory)?;
        }
        info!("Submitting {} jobs of task '{}'.", self.jobs.len(), self.name);
        let indices = (0..self.jobs.len()).collect::<Vec<_>>();
        self.dispatch(&indices, Operation::Submit, parallelism)?;

        self.status = TaskStatus::Submitted;
        self.save()
    }

    /// Resubmit the jobs with the given node identifiers, then move stale outputs away.
    pub fn resubmit(&mut self, nodeids: &[usize], parallelism: usize) -> Result<(), TaskError> {
        let indices = self.indices(nodeids);
        if indices.is_empty() {
            return Ok(());
        };
        self.remote.authorize()?;
        info!("Resubmitting {} jobs of task '{}'.", indices.len(), self.name);
        self.dispatch(&indices, Operation::Resubmit, parallelism)?;

        self.status = TaskStatus::Submitted;
        self.save()?;
        self.clean_up()
    }

    /// Kill the jobs with the given node identifiers, then move stale outputs away.
    pub fn kill(&mut self, nodeids: &[usize], parallelism: usize) -> Result<(), TaskError> {
        let indices = self.indices(nodeids);
        if indices.is_empty() {
            return Ok(());
        };
        info!("Killing {} jobs of task '{}'.", indices.len(), self.name);
        self.dispatch(&indices, Operation::Kill, parallelism)?;

        self.save()?;
        self.clean_up()
    }

    /// Get the node identifiers of jobs with one of the given remote statuses, whose records are
    /// still on the compute element.
    pub fn select(&self, statuses: &[RemoteStatus]) -> Vec<usize> {
        self.jobs.iter()
            .enumerate()
            .filter(|(_, job)| !job.get_status().is_finished())
            .filter(|(_, job)| job.get_infos().status.as_ref().map_or(false, |status| statuses.contains(status)))
            .map(|(nodeid, _)| nodeid)
            .collect()
    }

    /// Poll the status of every job still on the compute element, by batches, then update the
    /// aggregated flag. The task is only saved when something changed.
    pub fn update_status(&mut self) -> Result<(), TaskError> {
        let polled = self.jobs.iter()
            .enumerate()
            .filter(|(_, job)| !job.get_status().is_finished() && job.get_jobid().is_some())
            .map(|(index, _)| index)
            .collect::<Vec<_>>()
        ;
        if !polled.is_empty() {
            self.remote.authorize()?;
        };

        let mut changed = false;
        for batch in polled.chunks(self.remote.get_batch_size()) {
            let jobids = self.jobids(batch);
            let mut records = match self.remote.service().statuses(&jobids) {
                Ok(records) => records,
                Err(failure) => {
                    warn!("Unable to get the status of {} jobs: {}", jobids.len(), failure.output.trim());
                    continue;
                },
            };
            for (&index, jobid) in batch.iter().zip(&jobids) {
                match records.remove(jobid) {
                    Some(infos) if infos.is_empty() => warn!("Empty status record for '{}'.", jobid),
                    Some(infos) => {
                        if &infos != self.jobs[index].get_infos() {
                            self.jobs[index].set_infos(infos);
                            changed = true;
                        };
                    },
                    None => warn!("No status reported for '{}'.", jobid),
                };
            }
        }

        if let Some(status) = self.aggregate_status() {
            if status != self.status {
                debug!("Task '{}' status changed from '{}' to '{}'.", self.name, self.status, status);
                self.status = status;
                changed = true;
            };
        };

        match changed {
            true => self.save(),
            false => Ok(()),
        }
    }

    /// Retrieve the outputs of successfully done jobs, by batches, into the task directory.
    /// Retrieved jobs are purged from the compute element; jobs whose output couldn't be
    /// retrieved are flagged as such.
    pub fn fetch_output(&mut self, connections: u32) -> Result<(), TaskError> {
        let ready = self.jobs.iter()
            .enumerate()
            .filter(|(_, job)| !job.get_status().is_finished() && job.get_jobid().is_some())
            .filter(|(_, job)| job.get_infos().status == Some(RemoteStatus::DoneOk))
            .map(|(index, _)| index)
            .collect::<Vec<_>>()
        ;
        if ready.is_empty() {
            info!("No output to retrieve for task '{}'.", self.name);
            return Ok(());
        };
        self.remote.authorize()?;

        for batch in ready.chunks(self.remote.get_batch_size()) {
            let jobids = self.jobids(batch);
            let retrieved = match self.remote.service().output(&jobids, &self.directory, connections) {
                Ok(retrieved) => retrieved,
                Err(failure) => {
                    warn!("Unable to retrieve the output of {} jobs: {}", jobids.len(), failure.output.trim());
                    continue;
                },
            };
            for (&index, jobid) in batch.iter().zip(&jobids) {
                match retrieved.contains(jobid) {
                    true => self.jobs[index].complete_retrieval(&self.remote),
                    false => {
                        warn!("Output of '{}' has not been retrieved.", jobid);
                        self.jobs[index].fail_retrieval();
                    },
                };
            }
        }

        self.save()
    }

    /// Count the jobs of this task by status.
    pub fn status_numbers(&self) -> Summary {
        let mut summary = Summary::default();
        for job in &self.jobs {
            let infos = job.get_infos();
            *summary.remote.entry(infos.status_label().to_string()).or_insert(0) += 1;
            *summary.local.entry(job.get_status().as_str().to_string()).or_insert(0) += 1;
            match (&infos.status, infos.exit_code) {
                (Some(RemoteStatus::DoneOk), Some(0)) => summary.good += 1,
                (Some(RemoteStatus::DoneOk), _) if infos.has_exit_code() => summary.bad += 1,
                (Some(RemoteStatus::DoneFailed), _) | (Some(RemoteStatus::Aborted), _) => summary.bad += 1,
                _ => {},
            };
            summary.total += 1;
        }

        summary
    }

    /// Move every subdirectory of the task directory which is not the output directory of a
    /// current job to the backup directory. Nothing is ever deleted.
    pub fn clean_up(&self) -> Result<(), TaskError> {
        let tracked = self.jobs.iter()
            .filter_map(Job::output_subdirectory)
            .collect::<HashSet<_>>()
        ;
        let backup = self.directory.join(BACKUP_DIRECTORY);

        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == BACKUP_DIRECTORY || tracked.contains(&name) {
                continue;
            };

            fs::create_dir_all(&backup)?;
            let target = free_path(&backup, &name);
            fs::rename(entry.path(), &target)?;
            info!("Moved stale directory '{}' to '{}'.", name, target.display());
        }

        Ok(())
    }

    /// Save a snapshot of this task in its directory.
    pub fn save(&self) -> Result<(), TaskError> {
        self.store.save(&TaskRecord::from(self))?;

        Ok(())
    }

    fn create_directory(&self) -> Result<(), TaskError> {
        if self.directory.exists() {
            match self.mode {
                Mode::Recreate => {
                    debug!("Removing existing directory '{}'.", self.directory.display());
                    fs::remove_dir_all(&self.directory)?;
                },
                Mode::Create | Mode::Open => return Err(TaskError::DirectoryExists(self.directory.clone())),
            };
        };
        fs::create_dir_all(&self.directory)?;

        Ok(())
    }

    fn placement(&self) -> Placement {
        Placement {
            endpoint: self.endpoint.clone(),
            directory: self.directory.clone(),
        }
    }

    fn dispatch(&mut self, indices: &[usize], operation: Operation, parallelism: usize) -> Result<(), TaskError> {
        let placement = self.placement();
        dispatch(&mut self.jobs, indices, operation, &self.remote, &placement, parallelism)?;

        Ok(())
    }

    /// Get the indices of jobs with the given node identifiers, ignoring unknown ones.
    fn indices(&self, nodeids: &[usize]) -> Vec<usize> {
        let mut indices = Vec::new();
        for &nodeid in nodeids {
            match nodeid < self.jobs.len() {
                true if !indices.contains(&nodeid) => indices.push(nodeid),
                true => {},
                false => warn!("Task '{}' has no job {}.", self.name, nodeid),
            };
        }

        indices
    }

    /// Get the remote identifiers of the jobs at the given indices. Jobs must have one.
    fn jobids(&self, indices: &[usize]) -> Vec<String> {
        indices.iter()
            .filter_map(|&index| self.jobs[index].get_jobid().map(String::from))
            .collect()
    }

    /// Compute the aggregated flag from the jobs, if any rule applies.
    fn aggregate_status(&self) -> Option<TaskStatus> {
        if self.jobs.is_empty() {
            return None;
        };
        let remote_status = |job: &Job| job.get_infos().status.clone();

        if self.jobs.iter().any(|job| remote_status(job).map_or(false, |status| status.is_running())) {
            Some(TaskStatus::Running)
        } else if self.jobs.iter().all(|job| job.get_status() == FrontEndStatus::Retrieved) {
            Some(TaskStatus::Retrieved)
        } else if self.jobs.iter().all(|job| remote_status(job).map_or(false, |status| status.is_done())) {
            Some(TaskStatus::Done)
        } else if self.jobs.iter().all(|job| job.get_status() == FrontEndStatus::Purged) {
            Some(TaskStatus::Purged)
        } else {
            None
        }
    }
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            endpoint: Some(task.endpoint.clone()),
            architecture: task.environment.architecture.clone(),
            runtime: task.environment.runtime.clone(),
            executable: task.sandbox.executable.clone(),
            input_files: task.sandbox.input_files.clone(),
            output_files: task.sandbox.output_files.clone(),
            status: task.status,
            jobs: task.jobs.iter().map(Into::into).collect(),
        }
    }
}

fn absolute(directory: &Path) -> PathBuf {
    match env::current_dir() {
        Ok(current) if directory.is_relative() => current.join(directory),
        _ => directory.to_path_buf(),
    }
}

/// Get a path for the given name in the given directory, not used yet, adding a numerical
/// suffix if needed.
fn free_path(directory: &Path, name: &str) -> PathBuf {
    let mut path = directory.join(name);
    let mut suffix = 1;
    while path.exists() {
        path = directory.join(format!("{}.{}", name, suffix));
        suffix += 1;
    }

    path
}

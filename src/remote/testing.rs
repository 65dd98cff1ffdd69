//! Test doubles of the remote services.

use crate::proxy::{ProxyManager, Settings};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use super::{Completed, Executor, Failure, Infos, Invocation, Policy, Remote, RemoteStatus, Service, Sleeper, Submission};

/// An executor replaying scripted completions in order, and recording invocations. When the
/// script is exhausted, commands can't be started anymore.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Completed>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Completed>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn run(&self, invocation: &Invocation) -> Result<Completed, IoError> {
        self.invocations.lock().unwrap().push(invocation.clone());

        match self.script.lock().unwrap().pop_front() {
            Some(completed) => Ok(completed),
            None => Err(IoError::new(ErrorKind::NotFound, "no such command")),
        }
    }
}

/// A sleeper recording requested durations instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    durations: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn durations(&self) -> Vec<Duration> {
        self.durations.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.durations.lock().unwrap().push(duration);
    }
}

/// A remote call received by the fake compute element.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Submit(String),
    Status(String),
    Statuses(Vec<String>),
    Output(Vec<String>),
    Cancel(String),
    Purge(String),
}

/// A fake compute element, keeping the remote status of jobs in memory.
///
/// Submissions follow the scripted outcomes first, then succeed with fresh identifiers.
#[derive(Default)]
pub struct FakeCompute {
    submissions: Mutex<VecDeque<Submission>>,
    submitted: Mutex<usize>,
    records: Mutex<HashMap<String, Infos>>,
    unretrievable: Mutex<HashSet<String>>,
    failing: Mutex<bool>,
    calls: Mutex<Vec<Call>>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_submissions(&self, submissions: Vec<Submission>) {
        self.submissions.lock().unwrap().extend(submissions);
    }

    pub fn set_status(&self, jobid: &str, status: RemoteStatus, exit_code: Option<i32>) {
        let mut infos = Infos::new();
        infos.status = Some(status);
        infos.exit_code = exit_code;
        self.records.lock().unwrap().insert(jobid.to_string(), infos);
    }

    pub fn set_record(&self, jobid: &str, infos: Infos) {
        self.records.lock().unwrap().insert(jobid.to_string(), infos);
    }

    pub fn set_unretrievable(&self, jobid: &str) {
        self.unretrievable.lock().unwrap().insert(jobid.to_string());
    }

    /// Make every call but submissions fail.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) -> Result<(), Failure> {
        self.calls.lock().unwrap().push(call);

        match *self.failing.lock().unwrap() {
            true => Err(Failure::new(Some(1), "FATAL - service unavailable")),
            false => Ok(()),
        }
    }
}

impl Service for FakeCompute {
    fn submit(&self, _endpoint: &str, descriptor: &Path, _directory: &Path) -> Submission {
        let name = descriptor.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        self.calls.lock().unwrap().push(Call::Submit(name));

        if let Some(submission) = self.submissions.lock().unwrap().pop_front() {
            return submission;
        };
        let mut submitted = self.submitted.lock().unwrap();
        *submitted += 1;

        Submission::Accepted(Some(format!("https://ce.test:8443/CREAM{}", submitted)))
    }

    fn status(&self, jobid: &str) -> Result<Infos, Failure> {
        self.record(Call::Status(jobid.to_string()))?;

        Ok(self.records.lock().unwrap().get(jobid).cloned().unwrap_or_default())
    }

    fn statuses(&self, jobids: &[String]) -> Result<HashMap<String, Infos>, Failure> {
        self.record(Call::Statuses(jobids.to_vec()))?;
        let records = self.records.lock().unwrap();

        Ok(jobids.iter()
            .filter_map(|jobid| records.get(jobid).map(|infos| (jobid.clone(), infos.clone())))
            .collect())
    }

    fn output(&self, jobids: &[String], _directory: &Path, _connections: u32) -> Result<HashSet<String>, Failure> {
        self.record(Call::Output(jobids.to_vec()))?;
        let unretrievable = self.unretrievable.lock().unwrap();

        Ok(jobids.iter().filter(|jobid| !unretrievable.contains(*jobid)).cloned().collect())
    }

    fn cancel(&self, jobid: &str) -> Result<(), Failure> {
        self.record(Call::Cancel(jobid.to_string()))
    }

    fn purge(&self, jobid: &str) -> Result<(), Failure> {
        self.record(Call::Purge(jobid.to_string()))
    }
}

/// Create a remote over the given fake compute element, without credential checks, recording
/// sleeps in the given sleeper.
pub fn remote(compute: &Arc<FakeCompute>, sleeper: &Arc<RecordingSleeper>) -> Remote {
    Remote::new(compute.clone(), None, Policy::new(50, Duration::from_secs(60)), sleeper.clone(), 100)
}

/// Create a remote over the given fake compute element, checking the credential before remote
/// calls with VOMS tools run by the given executor.
pub fn authorized_remote(compute: &Arc<FakeCompute>, executor: &Arc<ScriptedExecutor>) -> Remote {
    let settings = Settings {
        passphrase: Some(String::from("secret")),
        ..Settings::default()
    };
    let proxy = ProxyManager::new(executor.clone(), settings);

    Remote::new(
        compute.clone(),
        Some(Arc::new(proxy)),
        Policy::new(50, Duration::from_secs(60)),
        Arc::new(RecordingSleeper::default()),
        100,
    )
}

/// Get the programs run by the given executor, in order.
pub fn programs(executor: &ScriptedExecutor) -> Vec<String> {
    executor.invocations().iter().map(|invocation| invocation.get_program().to_string()).collect()
}

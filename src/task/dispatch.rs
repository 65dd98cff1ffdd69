//! Dispatch of job operations, sequentially or through a pool of worker threads.
//!
//! Workers never touch the jobs of the task. Each request carries a copy of a job; the worker
//! runs the operation on the copy and sends back its outcome, which the parent applies on the
//! original job once received. Requests and responses are matched with their identifier.
//!
//! Workers never check nor renew the credential: the caller makes sure it is valid before a
//! parallel dispatch.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crate::job::{Job, Outcome, Placement};
use crate::proxy::CredentialError;
use crate::remote::Remote;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::io::Error as IoError;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operation {
    Submit,
    Resubmit,
    Kill,
}

impl Operation {
    /// Run this operation on the given job.
    fn perform(&self, job: &mut Job, remote: &Remote, placement: &Placement) -> Result<(), CredentialError> {
        match self {
            Self::Submit => job.submit(remote, placement),
            Self::Resubmit => job.resubmit(remote, placement),
            Self::Kill => {
                job.kill(remote);
                Ok(())
            },
        }
    }
}

#[derive(Debug)]
pub enum DispatchError {
    Credential(CredentialError),
    /// A worker thread couldn't be started.
    Spawn(IoError),
}

impl From<CredentialError> for DispatchError {
    fn from(error: CredentialError) -> Self {
        Self::Credential(error)
    }
}

struct Request {
    identifier: Uuid,
    operation: Operation,
    job: Job,
}

struct Response {
    identifier: Uuid,
    result: Result<Outcome, CredentialError>,
}

/// Run the given operation on the jobs at the given indices. A parallelism of 0 runs operations
/// one after the other in the current thread; otherwise, up to `parallelism` workers are started
/// for this dispatch, and stopped before returning.
pub fn dispatch(
    jobs: &mut [Job],
    indices: &[usize],
    operation: Operation,
    remote: &Remote,
    placement: &Placement,
    parallelism: usize,
) -> Result<(), DispatchError> {
    if parallelism == 0 || indices.is_empty() {
        for &index in indices {
            operation.perform(&mut jobs[index], remote, placement)?;
        }

        return Ok(());
    };

    let (request_sender, request_receiver) = unbounded::<Request>();
    let (response_sender, response_receiver) = unbounded::<Response>();
    let mut workers = Vec::new();
    for number in 0..parallelism.min(indices.len()) {
        let receiver = request_receiver.clone();
        let sender = response_sender.clone();
        let remote = remote.detached();
        let placement = placement.clone();
        let worker = thread::Builder::new()
            .name(format!("cesubmit/worker-{}", number))
            .spawn(move || work(receiver, sender, remote, placement))
            .map_err(DispatchError::Spawn)?
        ;
        workers.push(worker);
    }
    drop(response_sender);

    let mut pending = HashMap::new();
    for &index in indices {
        let identifier = Uuid::new_v4();
        pending.insert(identifier, index);
        if request_sender.send(Request { identifier, operation, job: jobs[index].clone() }).is_err() {
            error!("All workers stopped before receiving every request.");
            break;
        };
    }
    drop(request_sender);

    let mut credential_error = None;
    while !pending.is_empty() {
        match response_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(response) => match pending.remove(&response.identifier) {
                Some(index) => match response.result {
                    Ok(outcome) => jobs[index].apply(outcome),
                    Err(error) => credential_error = Some(error),
                },
                None => warn!("Received a response for an unknown request ({}).", response.identifier),
            },
            Err(RecvTimeoutError::Timeout) => debug!("Waiting for {} jobs.", pending.len()),
            Err(RecvTimeoutError::Disconnected) => {
                error!("Workers stopped with {} jobs left unprocessed.", pending.len());
                break;
            },
        };
    }

    for worker in workers {
        if worker.join().is_err() {
            error!("A worker panicked.");
        };
    }

    match credential_error {
        Some(error) => Err(DispatchError::Credential(error)),
        None => Ok(()),
    }
}

fn work(receiver: Receiver<Request>, sender: Sender<Response>, remote: Remote, placement: Placement) {
    for mut request in receiver {
        let result = request.operation
            .perform(&mut request.job, &remote, &placement)
            .map(|_| request.job.outcome())
        ;
        if sender.send(Response { identifier: request.identifier, result }).is_err() {
            return;
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FrontEndStatus, Sandbox};
    use crate::remote::testing::{remote, Call, FakeCompute, RecordingSleeper};
    use std::sync::Arc;

    fn jobs(count: usize, placement: &Placement) -> Vec<Job> {
        let sandbox = Sandbox {
            executable: Some(String::from("run.sh")),
            ..Sandbox::default()
        };

        (0..count)
            .map(|nodeid| {
                let mut job = Job::new(vec![nodeid.to_string()]);
                job.render_descriptor(nodeid, &sandbox, &placement.directory).unwrap();
                job
            })
            .collect()
    }

    #[test]
    fn sequential_dispatch() {
        let directory = tempfile::tempdir().unwrap();
        let placement = Placement { endpoint: String::from("ce1"), directory: directory.path().to_path_buf() };
        let compute = Arc::new(FakeCompute::new());
        let remote = remote(&compute, &Arc::new(RecordingSleeper::default()));
        let mut jobs = jobs(3, &placement);

        dispatch(&mut jobs, &[0, 2], Operation::Submit, &remote, &placement, 0).unwrap();

        assert_eq!(compute.calls(), vec![Call::Submit(String::from("job0.jdl")), Call::Submit(String::from("job2.jdl"))]);
        assert_eq!(jobs[0].get_jobid(), Some("https://ce.test:8443/CREAM1"));
        assert_eq!(jobs[1].get_status(), FrontEndStatus::JdlWritten);
        assert_eq!(jobs[2].get_jobid(), Some("https://ce.test:8443/CREAM2"));
    }

    #[test]
    fn parallel_dispatch() {
        let directory = tempfile::tempdir().unwrap();
        let placement = Placement { endpoint: String::from("ce1"), directory: directory.path().to_path_buf() };
        let compute = Arc::new(FakeCompute::new());
        let remote = remote(&compute, &Arc::new(RecordingSleeper::default()));
        let mut jobs = jobs(20, &placement);
        let indices = (0..20).collect::<Vec<_>>();

        dispatch(&mut jobs, &indices, Operation::Submit, &remote, &placement, 4).unwrap();

        assert_eq!(compute.calls().len(), 20);
        assert!(jobs.iter().all(|job| job.get_status() == FrontEndStatus::Sent));
        let mut jobids = jobs.iter().filter_map(|job| job.get_jobid()).collect::<Vec<_>>();
        jobids.sort_unstable();
        jobids.dedup();
        assert_eq!(jobids.len(), 20);
    }

    #[test]
    fn parallel_kill() {
        let directory = tempfile::tempdir().unwrap();
        let placement = Placement { endpoint: String::from("ce1"), directory: directory.path().to_path_buf() };
        let compute = Arc::new(FakeCompute::new());
        let remote = remote(&compute, &Arc::new(RecordingSleeper::default()));
        let mut jobs = jobs(2, &placement);
        dispatch(&mut jobs, &[0, 1], Operation::Submit, &remote, &placement, 0).unwrap();

        dispatch(&mut jobs, &[1], Operation::Kill, &remote, &placement, 2).unwrap();

        assert_eq!(jobs[0].get_status(), FrontEndStatus::Sent);
        assert_eq!(jobs[1].get_status(), FrontEndStatus::Purged);
    }
}

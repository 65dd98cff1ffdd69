//! Durable snapshots of tasks and their jobs.
//!
//! A task directory holds the snapshot of its task in `task.state`: a sequence of frames (see
//! `frame`), the first one being the task entry, followed by one job entry per job, in node
//! order (see `encoder` for the entry format).
//!
//! Snapshots are never modified in place. A new snapshot is written to `task.state.writing`,
//! synchronized, then moved over `task.state`, so the file system always holds a complete
//! snapshot, either the previous one or the new one. This requires the atomic file move of the
//! file system hosting the task directory.
//!
//! Each save also writes `jobids.txt`, listing the remote identifier of every job (`None` for
//! jobs without identifier), one per line, for use by other grid tools.

mod encoder;
mod frame;

use chrono::DateTime;
use chrono::offset::Utc;
use crate::job::FrontEndStatus;
use crate::remote::Infos;
use crate::task::TaskStatus;
use log::debug;
use self::encoder::{Decoded, Encodable, Encoder};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "task.state";
pub const JOBIDS_FILE: &str = "jobids.txt";
const WRITING_FILE: &str = "task.state.writing";

/// A persisted task.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskRecord {
    pub name: String,
    /// Missing from snapshots written before endpoints were configurable.
    pub endpoint: Option<String>,
    pub architecture: String,
    pub runtime: Option<String>,
    pub executable: Option<String>,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
    pub status: TaskStatus,
    pub jobs: Vec<JobRecord>,
}

/// A persisted job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobRecord {
    pub nodeid: Option<usize>,
    pub jobid: Option<String>,
    pub executable: Option<String>,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
    pub arguments: Vec<String>,
    pub status: FrontEndStatus,
    pub infos: Infos,
    pub error: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum PersistError {
    EncodingFailure,
    WriteFailure(IoError),
}

impl fmt::Display for PersistError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodingFailure => formatter.write_str("the task is too large to be encoded"),
            Self::WriteFailure(error) => write!(formatter, "unable to write the task snapshot: {}", error),
        }
    }
}

impl From<IoError> for PersistError {
    fn from(error: IoError) -> Self {
        Self::WriteFailure(error)
    }
}

impl From<frame::WriteError> for PersistError {
    fn from(error: frame::WriteError) -> Self {
        match error {
            frame::WriteError::InvalidData => Self::EncodingFailure,
            frame::WriteError::WriteFailure(error) => Self::WriteFailure(error),
        }
    }
}

impl From<encoder::EncodeError> for PersistError {
    fn from(_: encoder::EncodeError) -> Self {
        Self::EncodingFailure
    }
}

#[derive(Debug)]
pub enum LoadError {
    /// The directory holds no task snapshot.
    MissingSnapshot(PathBuf),
    UnreadableFile(IoError),
    CorruptedFile,
    /// The snapshot is readable, but its entries are invalid.
    InvalidEntry,
}

impl fmt::Display for LoadError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSnapshot(path) => write!(formatter, "no task snapshot found at '{}'", path.display()),
            Self::UnreadableFile(error) => write!(formatter, "unable to read the task snapshot: {}", error),
            Self::CorruptedFile => formatter.write_str("the task snapshot is truncated"),
            Self::InvalidEntry => formatter.write_str("the task snapshot contains invalid entries"),
        }
    }
}

impl From<frame::ReadError> for LoadError {
    fn from(error: frame::ReadError) -> Self {
        match error {
            frame::ReadError::CorruptedFile => Self::CorruptedFile,
            frame::ReadError::UnreadableFile(error) => Self::UnreadableFile(error),
        }
    }
}

/// The snapshot store of a task directory.
pub struct Store {
    directory: PathBuf,
    encoder: Encoder,
}

impl Store {
    /// Create a new store for the given task directory.
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            encoder: Encoder::new(),
        }
    }

    /// Replace the snapshot with the given task, then write the list of job identifiers.
    pub fn save(&self, task: &TaskRecord) -> Result<(), PersistError> {
        let writing_path = self.directory.join(WRITING_FILE);
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&writing_path)?;
        let mut writer = frame::Writer::new(&mut file);
        writer.write(&self.encoder.encode(Encodable::Task(task))?)?;
        for job in &task.jobs {
            writer.write(&self.encoder.encode(Encodable::Job(job))?)?;
        }
        writer.sync()?;
        fs::rename(&writing_path, self.directory.join(STATE_FILE))?;
        debug!("Task snapshot written with {} jobs.", task.jobs.len());

        let jobids = task.jobs.iter()
            .map(|job| format!("{}\n", job.jobid.as_deref().unwrap_or("None")))
            .collect::<String>()
        ;
        fs::write(self.directory.join(JOBIDS_FILE), jobids)?;

        Ok(())
    }

    /// Load the task snapshot.
    pub fn load(&self) -> Result<TaskRecord, LoadError> {
        let path = self.directory.join(STATE_FILE);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Err(LoadError::MissingSnapshot(path)),
            Err(error) => return Err(LoadError::UnreadableFile(error)),
        };
        let entries = frame::Reader::new(&mut file).all()?;

        let mut entries = entries.iter().map(|entry| self.encoder.decode(entry));
        let mut task = match entries.next() {
            Some(Ok(Decoded::Task(task))) => task,
            _ => return Err(LoadError::InvalidEntry),
        };
        for entry in entries {
            match entry {
                Ok(Decoded::Job(job)) => task.jobs.push(job),
                _ => return Err(LoadError::InvalidEntry),
            };
        }
        debug!("Task snapshot loaded with {} jobs.", task.jobs.len());

        Ok(task)
    }
}

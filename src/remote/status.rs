use std::collections::BTreeMap;
use std::fmt;

/// The status of a job, as reported by a CREAM compute element.
///
/// Statuses unknown to this crate are kept verbatim, so they can be displayed, counted and
/// persisted without loss.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteStatus {
    Registered,
    Pending,
    Idle,
    Running,
    ReallyRunning,
    Held,
    Cancelled,
    DoneOk,
    DoneFailed,
    Aborted,
    Unknown,
    Other(String),
}

impl RemoteStatus {
    /// Parse a status token, as printed by the compute element tools.
    pub fn parse(token: &str) -> Self {
        match token {
            "REGISTERED" => Self::Registered,
            "PENDING" => Self::Pending,
            "IDLE" => Self::Idle,
            "RUNNING" => Self::Running,
            "REALLY-RUNNING" => Self::ReallyRunning,
            "HELD" => Self::Held,
            "CANCELLED" => Self::Cancelled,
            "DONE-OK" => Self::DoneOk,
            "DONE-FAILED" => Self::DoneFailed,
            "ABORTED" => Self::Aborted,
            "UNKNOWN" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    /// Get the token representing this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Pending => "PENDING",
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::ReallyRunning => "REALLY-RUNNING",
            Self::Held => "HELD",
            Self::Cancelled => "CANCELLED",
            Self::DoneOk => "DONE-OK",
            Self::DoneFailed => "DONE-FAILED",
            Self::Aborted => "ABORTED",
            Self::Unknown => "UNKNOWN",
            Self::Other(token) => token,
        }
    }

    /// Check whether the job still occupies the compute element, and must be cancelled before
    /// being purged.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Idle | Self::Running | Self::ReallyRunning | Self::Held)
    }

    /// Check whether the job is executing on a worker node.
    pub fn is_running(&self) -> bool {
        self.as_str().contains("RUNNING")
    }

    /// Check whether the job has terminated its execution, successfully or not.
    pub fn is_done(&self) -> bool {
        self.as_str().contains("DONE")
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A status change in the history of a job.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub status: RemoteStatus,
    pub timestamp: String,
}

impl Transition {
    /// Create a new transition.
    pub fn new(status: RemoteStatus, timestamp: &str) -> Self {
        Self {
            status,
            timestamp: timestamp.to_string(),
        }
    }
}

/// A snapshot of everything the compute element reported about a job.
///
/// A snapshot is always replaced as a whole when a job is polled, never merged with a previous
/// one. Attributes without a dedicated field are kept in `raw`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Infos {
    pub status: Option<RemoteStatus>,
    pub exit_code: Option<i32>,
    pub history: Vec<Transition>,
    pub raw: BTreeMap<String, String>,
}

impl Infos {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.exit_code.is_none() && self.history.is_empty() && self.raw.is_empty()
    }

    /// Get the reported status label, `None` when no status has been reported.
    pub fn status_label(&self) -> &str {
        match &self.status {
            Some(status) => status.as_str(),
            None => "None",
        }
    }

    /// Check whether an exit code has been reported, even a non numerical one.
    pub fn has_exit_code(&self) -> bool {
        self.exit_code.is_some() || self.raw.contains_key("ExitCode")
    }

    /// Set the attribute with the given key. Known keys fill their dedicated field, others are
    /// kept raw. A non numerical exit code is kept raw.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "Status" => self.status = Some(RemoteStatus::parse(value)),
            "ExitCode" => match value.trim().parse::<i32>() {
                Ok(code) => self.exit_code = Some(code),
                Err(_) => {
                    self.raw.insert(key.to_string(), value.to_string());
                },
            },
            _ => {
                self.raw.insert(key.to_string(), value.to_string());
            },
        };
    }
}

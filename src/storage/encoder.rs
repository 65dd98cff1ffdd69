use chrono::DateTime;
use chrono::offset::{TimeZone, Utc};
use crate::job::FrontEndStatus;
use crate::remote::{Infos, RemoteStatus, Transition};
use crate::task::TaskStatus;
use nom::bytes::complete::take;
use nom::combinator::{all_consuming, flat_map};
use nom::Err as NomErr;
use nom::error::{Error, ErrorKind};
use nom::IResult;
use nom::multi::many0;
use nom::number::complete::{be_i32, be_i64, be_u16, be_u32, be_u64, be_u8};
use nom::sequence::{pair, tuple};
use super::{JobRecord, TaskRecord};

const ENTRY_TASK: u8 = 0;
const ENTRY_JOB: u8 = 1;

const TASK_NAME: u8 = 0;
const TASK_ENDPOINT: u8 = 1;
const TASK_ARCHITECTURE: u8 = 2;
const TASK_RUNTIME: u8 = 3;
const TASK_EXECUTABLE: u8 = 4;
const TASK_INPUT_FILES: u8 = 5;
const TASK_OUTPUT_FILES: u8 = 6;
const TASK_STATUS: u8 = 7;

const JOB_NODEID: u8 = 0;
const JOB_JOBID: u8 = 1;
const JOB_EXECUTABLE: u8 = 2;
const JOB_INPUT_FILES: u8 = 3;
const JOB_OUTPUT_FILES: u8 = 4;
const JOB_ARGUMENTS: u8 = 5;
const JOB_STATUS: u8 = 6;
const JOB_INFOS: u8 = 7;
const JOB_ERROR: u8 = 8;
const JOB_SUBMITTED_AT: u8 = 9;

const INFOS_STATUS: u8 = 0;
const INFOS_EXIT_CODE: u8 = 1;
const INFOS_HISTORY: u8 = 2;
const INFOS_RAW: u8 = 3;

#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// A task, without its jobs.
    Task(TaskRecord),
    Job(JobRecord),
}
#[derive(Debug, PartialEq)]
pub enum DecodeError {
    InvalidData,
}
pub type DecodeResult = Result<Decoded, DecodeError>;
pub enum Encodable<'a> {
    /// A task, encoded without its jobs.
    Task(&'a TaskRecord),
    Job(&'a JobRecord),
}
#[derive(Debug, PartialEq)]
pub enum EncodeError {
    MaximumSizeReached,
}
pub type EncodeResult = Result<Vec<u8>, EncodeError>;

/// Encode tasks and jobs as decodable binary entries.
///
/// An entry starts with its type (0 for tasks, 1 for jobs) on 1 byte, followed by tagged fields.
/// Each field is made of:
/// - [u8: 1]: the tag of the field, unique in its entry,
/// - [u8: 4]: the size of the value as big-endian,
/// - [u8: size]: the value.
/// Fields without value are omitted. Decoding ignores unknown tags and defaults missing fields,
/// so entries written by other versions remain readable.
///
/// Values are encoded as follows:
/// - strings: their UTF-8 bytes,
/// - lists of strings: each string prefixed by its size (in big-endian, on 16 bits),
/// - node identifiers: 8 bytes in big-endian,
/// - datetimes: their timestamp with nanoseconds precision, 8 bytes in big-endian,
/// - status snapshots: nested tagged fields (status, exit code, history and raw attributes).
pub struct Encoder {}

impl Encoder {
    /// Create a new encoder.
    pub fn new() -> Encoder {
        Encoder {}
    }

    /// Encode the given value into an array of bytes.
    pub fn encode(&self, value: Encodable<'_>) -> EncodeResult {
        match value {
            Encodable::Task(task) => self.encode_task(task),
            Encodable::Job(job) => self.encode_job(job),
        }
    }

    /// Decode the given entry.
    pub fn decode(&self, data: &[u8]) -> DecodeResult {
        let (entry_type, fields) = match all_consuming(pair(be_u8, many0(field)))(data) {
            Ok((_, parsed)) => parsed,
            Err(_) => return Err(DecodeError::InvalidData),
        };

        match entry_type {
            ENTRY_TASK => Ok(Decoded::Task(decode_task(&fields)?)),
            ENTRY_JOB => Ok(Decoded::Job(decode_job(&fields)?)),
            _ => Err(DecodeError::InvalidData),
        }
    }

    fn encode_task(&self, task: &TaskRecord) -> EncodeResult {
        let mut fields = Fields::new(ENTRY_TASK);
        fields.string(TASK_NAME, &task.name)?;
        fields.optional_string(TASK_ENDPOINT, task.endpoint.as_deref())?;
        fields.string(TASK_ARCHITECTURE, &task.architecture)?;
        fields.optional_string(TASK_RUNTIME, task.runtime.as_deref())?;
        fields.optional_string(TASK_EXECUTABLE, task.executable.as_deref())?;
        fields.strings(TASK_INPUT_FILES, &task.input_files)?;
        fields.strings(TASK_OUTPUT_FILES, &task.output_files)?;
        fields.string(TASK_STATUS, task.status.as_str())?;

        Ok(fields.into_bytes())
    }

    fn encode_job(&self, job: &JobRecord) -> EncodeResult {
        let mut fields = Fields::new(ENTRY_JOB);
        if let Some(nodeid) = job.nodeid {
            fields.bytes(JOB_NODEID, &(nodeid as u64).to_be_bytes())?;
        };
        fields.optional_string(JOB_JOBID, job.jobid.as_deref())?;
        fields.optional_string(JOB_EXECUTABLE, job.executable.as_deref())?;
        fields.strings(JOB_INPUT_FILES, &job.input_files)?;
        fields.strings(JOB_OUTPUT_FILES, &job.output_files)?;
        fields.strings(JOB_ARGUMENTS, &job.arguments)?;
        fields.string(JOB_STATUS, job.status.as_str())?;
        if !job.infos.is_empty() {
            fields.bytes(JOB_INFOS, &encode_infos(&job.infos)?)?;
        };
        fields.optional_string(JOB_ERROR, job.error.as_deref())?;
        if let Some(submitted_at) = &job.submitted_at {
            fields.bytes(JOB_SUBMITTED_AT, &submitted_at.timestamp_nanos().to_be_bytes())?;
        };

        Ok(fields.into_bytes())
    }
}

/// A buffer of tagged fields.
struct Fields {
    buffer: Vec<u8>,
}

impl Fields {
    fn new(entry_type: u8) -> Self {
        Self {
            buffer: vec![entry_type],
        }
    }

    fn bytes(&mut self, tag: u8, value: &[u8]) -> Result<(), EncodeError> {
        if value.len() > u32::MAX as usize {
            return Err(EncodeError::MaximumSizeReached);
        };
        self.buffer.push(tag);
        self.buffer.extend(&(value.len() as u32).to_be_bytes());
        self.buffer.extend(value);

        Ok(())
    }

    fn string(&mut self, tag: u8, value: &str) -> Result<(), EncodeError> {
        self.bytes(tag, value.as_bytes())
    }

    fn optional_string(&mut self, tag: u8, value: Option<&str>) -> Result<(), EncodeError> {
        match value {
            Some(value) => self.string(tag, value),
            None => Ok(()),
        }
    }

    fn strings(&mut self, tag: u8, values: &[String]) -> Result<(), EncodeError> {
        if values.is_empty() {
            return Ok(());
        };
        let mut value = Vec::new();
        for string in values {
            push_sized_string(&mut value, string)?;
        }

        self.bytes(tag, &value)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

fn push_sized_string(buffer: &mut Vec<u8>, value: &str) -> Result<(), EncodeError> {
    if value.len() > u16::MAX as usize {
        return Err(EncodeError::MaximumSizeReached);
    };
    buffer.extend(&(value.len() as u16).to_be_bytes());
    buffer.extend(value.as_bytes());

    Ok(())
}

fn encode_infos(infos: &Infos) -> EncodeResult {
    // Nested fields carry no entry type: drop the leading byte of the buffer.
    let mut fields = Fields::new(0);
    if let Some(status) = &infos.status {
        fields.string(INFOS_STATUS, status.as_str())?;
    };
    if let Some(exit_code) = infos.exit_code {
        fields.bytes(INFOS_EXIT_CODE, &exit_code.to_be_bytes())?;
    };
    if !infos.history.is_empty() {
        let mut history = Vec::new();
        for transition in &infos.history {
            push_sized_string(&mut history, transition.status.as_str())?;
            push_sized_string(&mut history, &transition.timestamp)?;
        }
        fields.bytes(INFOS_HISTORY, &history)?;
    };
    if !infos.raw.is_empty() {
        let mut raw = Vec::new();
        for (key, value) in &infos.raw {
            push_sized_string(&mut raw, key)?;
            push_sized_string(&mut raw, value)?;
        }
        fields.bytes(INFOS_RAW, &raw)?;
    };

    Ok(fields.into_bytes().split_off(1))
}

/// A Nom parser, to parse a tagged field: its tag and its value.
fn field(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    tuple((be_u8, flat_map(be_u32, take)))(input)
}

/// A Nom parser, to parse valid UTF-8 strings prefixed by their size (in big-endian, on 16 bits).
fn sized_utf8_string(input: &[u8]) -> IResult<&[u8], String> {
    let (input, string) = flat_map(be_u16, take)(input)?;

    match String::from_utf8(string.to_vec()) {
        Ok(string) => Ok((input, string)),
        Err(_) => Err(NomErr::Failure(Error { input, code: ErrorKind::Tag })),
    }
}

/// Run the given parser on a whole field value.
fn value<'a, O, P>(parser: P, input: &'a [u8]) -> Result<O, DecodeError>
where
    P: FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
{
    match all_consuming(parser)(input) {
        Ok((_, output)) => Ok(output),
        Err(_) => Err(DecodeError::InvalidData),
    }
}

fn utf8(input: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(input.to_vec()).map_err(|_| DecodeError::InvalidData)
}

fn strings(input: &[u8]) -> Result<Vec<String>, DecodeError> {
    value(many0(sized_utf8_string), input)
}

fn string_pairs(input: &[u8]) -> Result<Vec<(String, String)>, DecodeError> {
    value(many0(pair(sized_utf8_string, sized_utf8_string)), input)
}

fn datetime(input: &[u8]) -> Result<DateTime<Utc>, DecodeError> {
    let timestamp = value(be_i64, input)?;

    Ok(Utc.timestamp(timestamp.div_euclid(1_000_000_000), timestamp.rem_euclid(1_000_000_000) as u32))
}

fn decode_task(fields: &[(u8, &[u8])]) -> Result<TaskRecord, DecodeError> {
    let mut task = TaskRecord::default();
    for &(tag, input) in fields {
        match tag {
            TASK_NAME => task.name = utf8(input)?,
            TASK_ENDPOINT => task.endpoint = Some(utf8(input)?),
            TASK_ARCHITECTURE => task.architecture = utf8(input)?,
            TASK_RUNTIME => task.runtime = Some(utf8(input)?),
            TASK_EXECUTABLE => task.executable = Some(utf8(input)?),
            TASK_INPUT_FILES => task.input_files = strings(input)?,
            TASK_OUTPUT_FILES => task.output_files = strings(input)?,
            TASK_STATUS => task.status = TaskStatus::parse(&utf8(input)?).ok_or(DecodeError::InvalidData)?,
            _ => {},
        };
    }

    Ok(task)
}

fn decode_job(fields: &[(u8, &[u8])]) -> Result<JobRecord, DecodeError> {
    let mut job = JobRecord::default();
    for &(tag, input) in fields {
        match tag {
            JOB_NODEID => job.nodeid = Some(value(be_u64, input)? as usize),
            JOB_JOBID => job.jobid = Some(utf8(input)?),
            JOB_EXECUTABLE => job.executable = Some(utf8(input)?),
            JOB_INPUT_FILES => job.input_files = strings(input)?,
            JOB_OUTPUT_FILES => job.output_files = strings(input)?,
            JOB_ARGUMENTS => job.arguments = strings(input)?,
            JOB_STATUS => job.status = FrontEndStatus::parse(&utf8(input)?).ok_or(DecodeError::InvalidData)?,
            JOB_INFOS => job.infos = decode_infos(input)?,
            JOB_ERROR => job.error = Some(utf8(input)?),
            JOB_SUBMITTED_AT => job.submitted_at = Some(datetime(input)?),
            _ => {},
        };
    }

    Ok(job)
}

fn decode_infos(input: &[u8]) -> Result<Infos, DecodeError> {
    let mut infos = Infos::new();
    for (tag, input) in value(many0(field), input)? {
        match tag {
            INFOS_STATUS => infos.status = Some(RemoteStatus::parse(&utf8(input)?)),
            INFOS_EXIT_CODE => infos.exit_code = Some(value(be_i32, input)?),
            INFOS_HISTORY => infos.history = string_pairs(input)?
                .into_iter()
                .map(|(status, timestamp)| Transition::new(RemoteStatus::parse(&status), &timestamp))
                .collect(),
            INFOS_RAW => infos.raw = string_pairs(input)?.into_iter().collect(),
            _ => {},
        };
    }

    Ok(infos)
}

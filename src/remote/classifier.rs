use super::executor::Completed;

/// Reasons for which a compute element temporarily refuses submissions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Busy {
    SubmissionsDisabled,
    JobRegister,
    ConnectionTimedOut,
    EndOfCommunication,
}

/// The classified result of a submission command.
#[derive(Clone, Debug, PartialEq)]
pub enum Submission {
    /// The job has been accepted. The identifier is missing when the tool didn't print one.
    Accepted(Option<String>),
    /// The compute element is busy; the same submission may succeed later.
    Busy(Busy),
    /// The submission failed, with the raw output of the tool.
    Rejected(String),
}

/// Classify the output of a submission command. Busy patterns are checked before generic
/// failures, since busy outputs also carry the `FATAL` marker.
pub fn classify_submission(completed: &Completed) -> Submission {
    let output = completed.stdout.as_str();

    if output.contains("FATAL") && output.contains("Submissions are disabled!") {
        return Submission::Busy(Busy::SubmissionsDisabled);
    };
    if output.contains("FATAL - jobRegister") {
        return Submission::Busy(Busy::JobRegister);
    };
    if output.contains("FATAL") && output.contains("Connection timed out") {
        return Submission::Busy(Busy::ConnectionTimedOut);
    };
    if output.contains("FATAL - EOF detected during communication") {
        return Submission::Busy(Busy::EndOfCommunication);
    };
    if output.contains("FATAL") || output.contains("ERROR") || !completed.success() {
        return Submission::Rejected(output.to_string());
    };

    Submission::Accepted(find_jobid(output))
}

/// Find the job identifier in the output of a successful submission: the last URI printed.
fn find_jobid(output: &str) -> Option<String> {
    output.lines()
        .filter_map(|line| line.find("https://").map(|position| &line[position..]))
        .filter_map(|uri| uri.split_whitespace().next())
        .last()
        .map(String::from)
}

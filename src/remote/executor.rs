use log::debug;
use std::io::{Error as IoError, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A command line to run on the local host, talking to a remote grid service.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    program: String,
    arguments: Vec<String>,
    directory: Option<PathBuf>,
    input: Option<String>,
    interactive: bool,
}

impl Invocation {
    /// Create a new invocation of the given program, without arguments.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            arguments: Vec::new(),
            directory: None,
            input: None,
            interactive: false,
        }
    }

    /// Append an argument.
    pub fn arg<S: Into<String>>(mut self, argument: S) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Append all the given arguments.
    pub fn args<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    /// Run the command from the given working directory.
    pub fn current_dir(mut self, directory: PathBuf) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Feed the given text to the standard input of the command.
    pub fn input(mut self, input: String) -> Self {
        self.input = Some(input);
        self
    }

    /// Attach the command to the terminal of the current process, letting it prompt the user.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Get the program name.
    pub fn get_program(&self) -> &str {
        &self.program
    }

    /// Get the arguments.
    pub fn get_arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Get the working directory, if one has been set.
    pub fn get_directory(&self) -> Option<&PathBuf> {
        self.directory.as_ref()
    }

    /// Check whether this command reads from the terminal.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// The result of a terminated command.
#[derive(Clone, Debug, PartialEq)]
pub struct Completed {
    pub code: Option<i32>,
    pub stdout: String,
}

impl Completed {
    /// Create a new completion with the given exit code and standard output.
    pub fn new(code: i32, stdout: &str) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.to_string(),
        }
    }

    /// Check whether the command exited with a zero code. Commands terminated by a signal are
    /// never successful.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something able to run invocations and wait for their termination.
pub trait Executor: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<Completed, IoError>;
}

/// An executor spawning real processes on the local host.
///
/// Standard output is captured and decoded lossily, so the output of a misbehaving tool never
/// fails the decoding. Interactive invocations inherit all standard streams and capture nothing.
pub struct System {}

impl System {
    /// Create a new system executor.
    pub fn new() -> Self {
        Self {}
    }
}

impl Executor for System {
    fn run(&self, invocation: &Invocation) -> Result<Completed, IoError> {
        debug!("Running {:?}.", invocation);
        let mut command = Command::new(&invocation.program);

        command.args(&invocation.arguments);
        if let Some(directory) = &invocation.directory {
            command.current_dir(directory);
        };

        if invocation.interactive {
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()?
            ;
            debug!("'{}' exiting with status '{:?}'.", invocation.program, status);

            return Ok(Completed {
                code: status.code(),
                stdout: String::new(),
            });
        };

        command
            .stdin(match invocation.input {
                Some(_) => Stdio::piped(),
                None => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
        ;
        let mut child = command.spawn()?;
        if let (Some(input), Some(mut stdin)) = (&invocation.input, child.stdin.take()) {
            stdin.write_all(input.as_bytes())?;
        };
        let output = child.wait_with_output()?;
        debug!("'{}' exiting with status '{:?}'.", invocation.program, output.status);
        if !output.stderr.is_empty() {
            debug!("'{}' standard error: {}", invocation.program, String::from_utf8_lossy(&output.stderr));
        };

        Ok(Completed {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_invocation() {
        let invocation = Invocation::new("glite-ce-job-status")
            .arg("-L1")
            .args(vec!["https://ce1/J1", "https://ce1/J2"])
        ;

        assert_eq!(invocation.get_program(), "glite-ce-job-status");
        assert_eq!(
            invocation.get_arguments(),
            &[String::from("-L1"), String::from("https://ce1/J1"), String::from("https://ce1/J2")],
        );
        assert_eq!(invocation.get_directory(), None);
        assert!(!invocation.is_interactive());
    }

    #[test]
    fn completion_success() {
        assert!(Completed::new(0, "").success());
        assert!(!Completed::new(1, "").success());
        assert!(!Completed { code: None, stdout: String::new() }.success());
    }

    #[cfg(unix)]
    #[test]
    fn run_system_command() {
        let executor = System::new();

        let completed = executor.run(&Invocation::new("sh").arg("-c").arg("echo hello; exit 3")).unwrap();
        assert_eq!(completed.code, Some(3));
        assert_eq!(completed.stdout, "hello\n");

        let completed = executor.run(&Invocation::new("cat").input(String::from("secret\n"))).unwrap();
        assert!(completed.success());
        assert_eq!(completed.stdout, "secret\n");
    }

    #[test]
    fn run_missing_command() {
        let executor = System::new();

        assert!(executor.run(&Invocation::new("cesubmit-this-command-does-not-exist")).is_err());
    }
}

//! CLI management, parsing CLI arguments given by the user.
//!
//! This module provides a complete handling on CLI arguments, including parsing arguments given by
//! the user, but also displaying the help and version commands. When arguments cannot get parsed,
//! it exits the program, displaying an appropriate message and returning the proper error code to
//! the parent shell.
//!
//! Every command but `submit` operates on a task directory, previously created by `submit`:
//! * `submit <MANIFEST>`: create the task described in a manifest file, and submit its jobs,
//! * `status <DIR>`: poll the status of jobs, and print a summary,
//! * `output <DIR>`: retrieve the outputs of successfully done jobs,
//! * `resubmit <DIR> [NODEID...] [--status STATUS...]`: resubmit the given jobs, and the jobs
//!   with the given remote statuses,
//! * `kill <DIR> <NODEID...>`: cancel and purge the given jobs,
//! * `cleanup <DIR>`: move stale output directories to the backup directory,
//! * `summary <DIR>`: print a summary without polling.
//!
//! The global option `-c`, `--config` takes the path to the configuration file used for the
//! current execution.

use clap::App;
use clap::AppSettings;
use clap::ArgMatches;
use clap::crate_name;
use clap::crate_version;
use clap::Arg;

#[derive(Debug, PartialEq)]
pub enum Command {
    Submit { manifest: String },
    Status { directory: String },
    Output { directory: String },
    Resubmit { directory: String, nodeids: Vec<usize>, statuses: Vec<String> },
    Kill { directory: String, nodeids: Vec<usize> },
    CleanUp { directory: String },
    Summary { directory: String },
}

#[derive(Debug, PartialEq)]
pub struct Arguments {
    pub configuration_path: Option<String>,
    /// Number of worker threads, overriding the configuration.
    pub jobs: Option<usize>,
    /// Number of transfer connections, overriding the configuration.
    pub streams: Option<u32>,
    pub command: Command,
}

pub struct Application {}

impl Application {
    /// Handle current CLI arguments. When arguments cannot get parsed, it exits the program,
    /// displaying the corresponding message, and returning the proper error code.
    pub fn handle_arguments() -> Arguments {
        Self::parse(Self::build().get_matches())
    }

    fn build() -> App<'static> {
        let directory = || Arg::new("directory")
            .required(true)
            .value_name("DIR")
            .help("Sets the task directory")
        ;
        let nodeids = || Arg::new("nodeids")
            .multiple_values(true)
            .value_name("NODEID")
            .validator(|value: &str| value.parse::<usize>())
            .help("Node identifiers of the jobs")
        ;
        let jobs = || Arg::new("jobs")
            .short('j')
            .long("jobs")
            .takes_value(true)
            .value_name("COUNT")
            .validator(|value: &str| value.parse::<usize>())
            .help("Sets the number of worker threads (0 to work sequentially)")
        ;

        App::new(crate_name!())
            .version(crate_version!())
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .arg(
                Arg::new("configuration_path")
                    .short('c')
                    .long("config")
                    .takes_value(true)
                    .value_name("FILE")
                    .help("Sets the path of the configuration file")
            )
            .subcommand(
                App::new("submit")
                    .about("Creates a task from a manifest, and submits its jobs")
                    .arg(Arg::new("manifest").required(true).value_name("MANIFEST").help("Sets the task manifest"))
                    .arg(jobs())
            )
            .subcommand(App::new("status").about("Polls the status of jobs").arg(directory()))
            .subcommand(
                App::new("output")
                    .about("Retrieves the outputs of successfully done jobs")
                    .arg(directory())
                    .arg(
                        Arg::new("streams")
                            .short('s')
                            .long("streams")
                            .takes_value(true)
                            .value_name("COUNT")
                            .validator(|value: &str| value.parse::<u32>())
                            .help("Sets the number of transfer connections")
                    )
            )
            .subcommand(
                App::new("resubmit")
                    .about("Resubmits jobs, by node identifiers or by remote statuses")
                    .arg(directory())
                    .arg(nodeids())
                    .arg(
                        Arg::new("statuses")
                            .long("status")
                            .takes_value(true)
                            .multiple_occurrences(true)
                            .value_name("STATUS")
                            .help("Resubmits jobs with the given remote status (e.g. ABORTED)")
                    )
                    .arg(jobs())
            )
            .subcommand(
                App::new("kill")
                    .about("Cancels and purges jobs")
                    .arg(directory())
                    .arg(nodeids().required(true))
                    .arg(jobs())
            )
            .subcommand(App::new("cleanup").about("Moves stale output directories away").arg(directory()))
            .subcommand(App::new("summary").about("Prints the last known status of jobs").arg(directory()))
            .help_template("USAGE: {usage}\n\n{all-args}")
    }

    fn parse(matches: ArgMatches) -> Arguments {
        let (name, submatches) = match matches.subcommand() {
            Some((name, submatches)) => (name, submatches),
            None => unreachable!("a subcommand is required"),
        };
        let directory = || submatches.value_of("directory").unwrap_or_default().to_string();
        let nodeids = || match submatches.values_of("nodeids") {
            Some(values) => values.filter_map(|value| value.parse().ok()).collect(),
            None => Vec::new(),
        };

        let command = match name {
            "submit" => Command::Submit { manifest: submatches.value_of("manifest").unwrap_or_default().to_string() },
            "status" => Command::Status { directory: directory() },
            "output" => Command::Output { directory: directory() },
            "resubmit" => Command::Resubmit {
                directory: directory(),
                nodeids: nodeids(),
                statuses: match submatches.values_of("statuses") {
                    Some(values) => values.map(String::from).collect(),
                    None => Vec::new(),
                },
            },
            "kill" => Command::Kill { directory: directory(), nodeids: nodeids() },
            "cleanup" => Command::CleanUp { directory: directory() },
            _ => Command::Summary { directory: directory() },
        };

        // Options may only be read from the subcommands defining them.
        let jobs = match name {
            "submit" | "resubmit" | "kill" => submatches.value_of("jobs").and_then(|value| value.parse().ok()),
            _ => None,
        };
        let streams = match name {
            "output" => submatches.value_of("streams").and_then(|value| value.parse().ok()),
            _ => None,
        };

        Arguments {
            configuration_path: matches.value_of("configuration_path").map(String::from),
            jobs,
            streams,
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(arguments: &[&str]) -> Arguments {
        Application::parse(Application::build().get_matches_from(arguments))
    }

    #[test]
    fn submit_command() {
        assert_eq!(
            parse(&["cesubmit", "-c", "grid.toml", "submit", "task.toml", "-j", "8"]),
            Arguments {
                configuration_path: Some(String::from("grid.toml")),
                jobs: Some(8),
                streams: None,
                command: Command::Submit { manifest: String::from("task.toml") },
            },
        );
    }

    #[test]
    fn resubmit_command() {
        let arguments = parse(&["cesubmit", "resubmit", "tasks/ttbar", "3", "7", "--status", "ABORTED", "--status", "DONE-FAILED"]);

        assert_eq!(arguments.command, Command::Resubmit {
            directory: String::from("tasks/ttbar"),
            nodeids: vec![3, 7],
            statuses: vec![String::from("ABORTED"), String::from("DONE-FAILED")],
        });
        assert_eq!(arguments.configuration_path, None);
    }

    #[test]
    fn output_command() {
        let arguments = parse(&["cesubmit", "output", "tasks/ttbar", "--streams", "4"]);

        assert_eq!(arguments.command, Command::Output { directory: String::from("tasks/ttbar") });
        assert_eq!(arguments.streams, Some(4));
    }

    #[test]
    fn commands_without_options() {
        for (name, command) in vec![
            ("status", Command::Status { directory: String::from("tasks/ttbar") }),
            ("cleanup", Command::CleanUp { directory: String::from("tasks/ttbar") }),
            ("summary", Command::Summary { directory: String::from("tasks/ttbar") }),
        ] {
            assert_eq!(parse(&["cesubmit", name, "tasks/ttbar"]), Arguments {
                configuration_path: None,
                jobs: None,
                streams: None,
                command,
            });
        }
    }

    #[test]
    fn kill_command() {
        let arguments = parse(&["cesubmit", "kill", "tasks/ttbar", "1", "2", "--jobs", "0"]);

        assert_eq!(arguments.command, Command::Kill { directory: String::from("tasks/ttbar"), nodeids: vec![1, 2] });
        assert_eq!(arguments.jobs, Some(0));
        assert_eq!(arguments.streams, None);
    }

    #[test]
    fn invalid_node_identifier() {
        let result = Application::build().try_get_matches_from(&["cesubmit", "kill", "tasks/ttbar", "first"]);

        assert!(result.is_err());
    }
}

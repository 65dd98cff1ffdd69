mod cli;
mod configuration;
mod job;
mod logger;
mod manifest;
mod proxy;
mod remote;
mod storage;
mod task;

use cli::{Application, Arguments, Command};
use configuration::Configuration;
use log::error;
use logger::Logger;
use manifest::Manifest;
use proxy::ProxyManager;
use remote::{Cream, Executor, Policy, Remote, RemoteStatus, System, ThreadSleeper};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use task::Task;

fn main() {
    let arguments = Application::handle_arguments();
    let configuration = match Configuration::new(arguments.configuration_path.as_deref()) {
        Ok(configuration) => configuration,
        Err(error) => {
            eprintln!("Unable to load the configuration: {}", error);
            process::exit(2);
        },
    };
    if let Err(error) = Logger::initialize(configuration.log.level) {
        eprintln!("Unable to initialize the logger: {}", error);
        process::exit(2);
    };

    if let Err(error) = run(arguments, &configuration) {
        error!("{}", error);
        process::exit(1);
    };
}

fn run(arguments: Arguments, configuration: &Configuration) -> Result<(), String> {
    let remote = connect(configuration)?;
    let parallelism = arguments.jobs.unwrap_or(configuration.submission.parallelism);
    let open = |directory: &str| Task::load(Path::new(directory), remote.clone()).map_err(|error| error.to_string());

    match arguments.command {
        Command::Submit { manifest } => {
            let mut task = Manifest::load(&manifest)?.into_task(&configuration.ce.endpoint, remote.clone());
            task.submit(parallelism).map_err(|error| error.to_string())?;
            println!("{}", task.status_numbers());
        },
        Command::Status { directory } => {
            let mut task = open(&directory)?;
            task.update_status().map_err(|error| error.to_string())?;
            println!("Task '{}': {}", task.get_name(), task.get_status());
            println!("{}", task.status_numbers());
        },
        Command::Output { directory } => {
            let mut task = open(&directory)?;
            let connections = arguments.streams.unwrap_or(configuration.batch.connections);
            task.fetch_output(connections).map_err(|error| error.to_string())?;
            println!("{}", task.status_numbers());
        },
        Command::Resubmit { directory, mut nodeids, statuses } => {
            let mut task = open(&directory)?;
            let statuses = statuses.iter().map(|status| RemoteStatus::parse(status)).collect::<Vec<_>>();
            nodeids.extend(task.select(&statuses));
            task.resubmit(&nodeids, parallelism).map_err(|error| error.to_string())?;
        },
        Command::Kill { directory, nodeids } => {
            let mut task = open(&directory)?;
            task.kill(&nodeids, parallelism).map_err(|error| error.to_string())?;
        },
        Command::CleanUp { directory } => {
            open(&directory)?.clean_up().map_err(|error| error.to_string())?;
        },
        Command::Summary { directory } => {
            let task = open(&directory)?;
            println!("Task '{}': {}", task.get_name(), task.get_status());
            println!("{}", task.status_numbers());
        },
    };

    Ok(())
}

/// Build the remote access to compute elements described by the configuration.
fn connect(configuration: &Configuration) -> Result<Remote, String> {
    let passphrase = match &configuration.proxy.passphrase_file {
        Some(path) => match fs::read_to_string(path) {
            Ok(passphrase) => Some(passphrase.trim_end_matches(&['\r', '\n'][..]).to_string()),
            Err(error) => return Err(format!("unable to read the passphrase file '{}': {}", path, error)),
        },
        None => None,
    };
    let executor: Arc<dyn Executor> = Arc::new(System::new());
    let proxy = ProxyManager::new(executor.clone(), proxy::Settings {
        voms: configuration.proxy.voms.clone(),
        validity: configuration.proxy.validity.clone(),
        minimum_lifetime: configuration.proxy.minimum_lifetime,
        passphrase,
    });

    Ok(Remote::new(
        Arc::new(Cream::new(executor)),
        Some(Arc::new(proxy)),
        Policy::new(configuration.submission.attempts, Duration::from_secs(configuration.submission.backoff)),
        Arc::new(ThreadSleeper {}),
        configuration.batch.size,
    ))
}

//! Task manifests, describing a new task and its jobs in a TOML file.
//!
//! ```toml
//! name = "ttbar"
//! directory = "tasks/ttbar"
//! executable = "analysis.sh"
//! input_files = ["config.py"]
//! output_files = ["histograms.root"]
//!
//! [environment]
//! architecture = "slc7_amd64_gcc700"
//! runtime = "CMSSW_10_2_18"
//!
//! [[jobs]]
//! arguments = ["--seed", "1"]
//!
//! [[jobs]]
//! arguments = ["--seed", "2"]
//! executable = "special.sh"
//! ```
//!
//! The directory defaults to the task name, the mode to `recreate`, the endpoint to the
//! configured one, and the environment to the default one.

use config::{Config, ConfigError, File, FileFormat};
use crate::job::{Job, Sandbox};
use crate::remote::Remote;
use crate::task::prologue::Environment;
use crate::task::{Mode, Task};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    Recreate,
    Create,
}
impl Default for DirectoryMode {
    fn default() -> Self {
        DirectoryMode::Recreate
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentManifest {
    pub architecture: String,
    #[serde(default)]
    pub runtime: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobManifest {
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub mode: DirectoryMode,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub environment: Option<EnvironmentManifest>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    pub jobs: Vec<JobManifest>,
}

impl Manifest {
    /// Load and validate the manifest in the given file.
    pub fn load(path: &str) -> Result<Self, String> {
        let manifest = match Self::read(path) {
            Ok(manifest) => manifest,
            Err(error) => return Err(format!("invalid manifest '{}': {}", path, error)),
        };

        if let Err(errors) = manifest.validate() {
            return Err(format!("invalid manifest '{}': {}", path, errors));
        };
        if manifest.jobs.is_empty() {
            return Err(format!("invalid manifest '{}': no jobs", path));
        };

        Ok(manifest)
    }

    fn read(path: &str) -> Result<Self, ConfigError> {
        let mut manifest = Config::default();
        manifest.merge(File::with_name(path).format(FileFormat::Toml).required(true))?;

        manifest.try_into()
    }

    /// Build the described task, sending its jobs to the given endpoint unless the manifest
    /// names one.
    pub fn into_task(self, endpoint: &str, remote: Remote) -> Task {
        let name = self.name;
        let directory = self.directory.unwrap_or_else(|| name.clone());
        let mode = match self.mode {
            DirectoryMode::Recreate => Mode::Recreate,
            DirectoryMode::Create => Mode::Create,
        };
        let environment = match self.environment {
            Some(environment) => Environment {
                architecture: environment.architecture,
                runtime: environment.runtime,
            },
            None => Environment::default(),
        };
        let sandbox = Sandbox {
            executable: self.executable,
            input_files: self.input_files,
            output_files: self.output_files,
        };

        let mut task = Task::new(name, Path::new(&directory), mode, remote)
            .with_endpoint(self.endpoint.unwrap_or_else(|| endpoint.to_string()))
            .with_environment(environment)
            .with_sandbox(sandbox)
        ;
        for manifest in self.jobs {
            let job = Job::new(manifest.arguments)
                .with_input_files(manifest.input_files)
                .with_output_files(manifest.output_files)
            ;
            task.add_job(match manifest.executable {
                Some(executable) => job.with_executable(executable),
                None => job,
            });
        }

        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{remote, FakeCompute, RecordingSleeper};
    use std::fs;
    use std::sync::Arc;

    fn load(content: &str) -> Result<Manifest, String> {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("task.toml");
        fs::write(&path, content).unwrap();

        Manifest::load(path.to_str().unwrap())
    }

    #[test]
    fn load_manifest() {
        let manifest = load(concat!(
            "name = \"ttbar\"\n",
            "directory = \"/tmp/tasks/ttbar\"\n",
            "mode = \"create\"\n",
            "executable = \"analysis.sh\"\n",
            "input_files = [\"config.py\"]\n",
            "\n",
            "[environment]\n",
            "architecture = \"slc7_amd64_gcc700\"\n",
            "\n",
            "[[jobs]]\n",
            "arguments = [\"1\"]\n",
            "\n",
            "[[jobs]]\n",
            "arguments = [\"2\"]\n",
            "executable = \"special.sh\"\n",
        )).unwrap();

        assert_eq!(manifest.mode, DirectoryMode::Create);
        assert_eq!(manifest.jobs.len(), 2);
        assert_eq!(manifest.jobs[1].executable.as_deref(), Some("special.sh"));

        let compute = Arc::new(FakeCompute::new());
        let task = manifest.into_task("ce1:8443/cream-pbs-cms", remote(&compute, &Arc::new(RecordingSleeper::default())));
        assert_eq!(task.get_name(), "ttbar");
        assert_eq!(task.get_directory(), Path::new("/tmp/tasks/ttbar"));
        assert_eq!(task.get_mode(), Mode::Create);
        assert_eq!(task.get_jobs().len(), 2);
        assert_eq!(task.get_jobs()[1].get_arguments(), &[String::from("2")]);
    }

    #[test]
    fn directory_defaults_to_name() {
        let manifest = load("name = \"ttbar\"\n[[jobs]]\narguments = [\"1\"]\n").unwrap();
        let compute = Arc::new(FakeCompute::new());

        let task = manifest.into_task("ce1:8443/cream-pbs-cms", remote(&compute, &Arc::new(RecordingSleeper::default())));

        assert!(task.get_directory().ends_with("ttbar"));
        assert_eq!(task.get_mode(), Mode::Recreate);
    }

    #[test]
    fn manifest_without_jobs() {
        assert!(load("name = \"ttbar\"\njobs = []\n").is_err());
        assert!(load("name = \"ttbar\"\n").is_err());
    }

    #[test]
    fn manifest_with_unknown_field() {
        assert!(load("name = \"ttbar\"\npriority = 3\n[[jobs]]\narguments = []\n").is_err());
    }
}

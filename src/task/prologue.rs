//! The wrapper script of jobs, preparing the execution environment before running the payload
//! given as its arguments.

use crate::job::descriptor::WRAPPER;
use std::fs;
use std::io::Error as IoError;
use std::path::Path;

/// The environment jobs run in: a software architecture, and optionally a versioned software
/// release to set up before running the payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Environment {
    pub architecture: String,
    pub runtime: Option<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            architecture: String::from("slc5_amd64_gcc462"),
            runtime: Some(String::from("CMSSW_5_3_14")),
        }
    }
}

/// Render the wrapper script for the given environment.
pub fn render(environment: &Environment) -> String {
    let mut script = String::from("#!/bin/sh -e\n");
    script.push_str("echo Job started: $(date)\n");
    script.push_str("chmod u+x $1\n");
    script.push_str("RUNAREA=$(pwd)\n");
    script.push_str("echo Running in: $RUNAREA\n");
    script.push_str("echo Running on: $HOSTNAME\n");
    if let Some(runtime) = &environment.runtime {
        script.push_str(&format!("echo Setting SCRAM_ARCH to {}\n", environment.architecture));
        script.push_str(&format!("export SCRAM_ARCH={}\n", environment.architecture));
        script.push_str("export BUILD_ARCH=$SCRAM_ARCH\n");
        script.push_str("source $VO_CMS_SW_DIR/cmsset_default.sh\n");
        script.push_str(&format!("scram project CMSSW {}\n", runtime));
        script.push_str(&format!("cd {}\n", runtime));
        script.push_str("eval $(scramv1 ru -sh)\n");
        script.push_str("cd $RUNAREA\n");
    };
    script.push_str("env\n");
    script.push_str("echo Current directory $PWD\n");
    script.push_str("echo Directory content:\n");
    script.push_str("ls\n");
    script.push_str("$@\n");
    script.push_str("echo Current directory $PWD\n");
    script.push_str("echo Directory content:\n");
    script.push_str("ls\n");
    script.push_str("echo Job ended: $(date)\n");

    script
}

/// Write the wrapper script in the given task directory.
pub fn write(directory: &Path, environment: &Environment) -> Result<(), IoError> {
    fs::write(directory.join(WRAPPER), render(environment))
}

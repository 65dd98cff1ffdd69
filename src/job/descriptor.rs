//! Rendering of job descriptors, in the Job Description Language understood by CREAM.
//!
//! Every job runs the task wrapper script (`prologue.sh`), which prepares the runtime
//! environment and then executes the real payload given as its arguments. Standard streams of the
//! wrapper are always captured in `out.txt` and `err.txt`.

use std::path::Path;

pub const WRAPPER: &str = "prologue.sh";
const STDOUT: &str = "out.txt";
const STDERR: &str = "err.txt";

/// The sandboxes and arguments of a job.
pub struct Descriptor<'a> {
    pub executable: &'a str,
    pub arguments: &'a [String],
    pub input_files: Vec<&'a str>,
    pub output_files: Vec<&'a str>,
}

/// Get the name of the descriptor file of the job with the given node identifier.
pub fn file_name(nodeid: usize) -> String {
    format!("job{}.jdl", nodeid)
}

impl<'a> Descriptor<'a> {
    /// Render this descriptor.
    pub fn render(&self) -> String {
        let wrapper = format!("./{}", WRAPPER);
        let mut input_sandbox = vec![wrapper.as_str(), self.executable];
        input_sandbox.extend(&self.input_files);
        let mut output_sandbox = vec![STDOUT, STDERR];
        output_sandbox.extend(&self.output_files);
        let basename = Path::new(self.executable)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.to_string())
        ;
        let mut arguments = vec![format!("./{}", basename)];
        arguments.extend(self.arguments.iter().cloned());

        let mut jdl = String::from("[Type = \"Job\";\n");
        jdl.push_str("VirtualOrganisation = \"cms\";\n");
        jdl.push_str("AllowZippedISB = true;\n");
        jdl.push_str("ShallowRetryCount = 10;\n");
        jdl.push_str("RetryCount = 3;\n");
        jdl.push_str("MyProxyServer = \"\";\n");
        jdl.push_str(&format!("executable = \"{}\";\n", WRAPPER));
        jdl.push_str(&format!("StdOutput = \"{}\";\n", STDOUT));
        jdl.push_str(&format!("StdError  = \"{}\";\n", STDERR));
        jdl.push_str("outputsandboxbasedesturi=\"gsiftp://localhost\";\n");
        jdl.push_str(&format!("InputSandbox = {{ {} }};\n", quoted_list(&input_sandbox)));
        jdl.push_str(&format!("OutputSandbox = {{ {} }};\n", quoted_list(&output_sandbox)));
        jdl.push_str(&format!("Arguments = \"{}\";\n", arguments.join(" ")));
        jdl.push(']');

        jdl
    }
}

fn quoted_list(items: &[&str]) -> String {
    items.iter()
        .map(|item| format!("\"{}\"", item))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_descriptor() {
        let arguments = vec![String::from("-n"), String::from("100")];
        let descriptor = Descriptor {
            executable: "/home/user/bin/analysis.sh",
            arguments: &arguments,
            input_files: vec!["config.txt", "shared.tar.gz"],
            output_files: vec!["histograms.root"],
        };

        assert_eq!(
            descriptor.render(),
            concat!(
                "[Type = \"Job\";\n",
                "VirtualOrganisation = \"cms\";\n",
                "AllowZippedISB = true;\n",
                "ShallowRetryCount = 10;\n",
                "RetryCount = 3;\n",
                "MyProxyServer = \"\";\n",
                "executable = \"prologue.sh\";\n",
                "StdOutput = \"out.txt\";\n",
                "StdError  = \"err.txt\";\n",
                "outputsandboxbasedesturi=\"gsiftp://localhost\";\n",
                "InputSandbox = { \"./prologue.sh\", \"/home/user/bin/analysis.sh\", \"config.txt\", \"shared.tar.gz\" };\n",
                "OutputSandbox = { \"out.txt\", \"err.txt\", \"histograms.root\" };\n",
                "Arguments = \"./analysis.sh -n 100\";\n",
                "]",
            ),
        );
    }

    #[test]
    fn descriptor_file_name() {
        assert_eq!(file_name(0), "job0.jdl");
        assert_eq!(file_name(42), "job42.jdl");
    }
}

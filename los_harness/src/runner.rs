//! Invocation of the program under test.
//!
//! The harnesses only see the [`Runner`] trait, so tests substitute in-process
//! fakes for the real executable.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::HarnessError;

/// The configuration knob varied for a single invocation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Knob {
    /// Algorithm selector passed to the program.
    Variant(u8),
    /// Number of parallel workers to launch.
    Processes(usize),
}

impl std::fmt::Display for Knob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Knob::Variant(selector) => write!(f, "variant {selector}"),
            Knob::Processes(count) => write!(f, "{count} proc"),
        }
    }
}

pub trait Runner {
    /// Run once and return the first line of standard output, trimmed.
    fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError>;
}

/// Comma separated altitudes; integral values print without a fraction.
pub fn encode_altitudes(altitudes: &[f64]) -> String {
    altitudes
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Runs `program <altitudes> <selector>` directly, e.g. a wrapper script
/// that compiles and launches the implementation.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    pub program: PathBuf,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Runner for CommandRunner {
    fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError> {
        let selector = match knob {
            Knob::Variant(selector) => selector.to_string(),
            Knob::Processes(count) => count.to_string(),
        };
        let args = vec![OsString::from(encode_altitudes(altitudes)), selector.into()];
        run_command(self.program.clone().into_os_string(), args)
    }
}

/// Launches the executable through an MPI launcher with `-np <count>`.
#[derive(Clone, Debug)]
pub struct MpiRunner {
    pub launcher: String,
    pub hostfile: Option<PathBuf>,
    pub executable: PathBuf,
    /// Extra launcher flags placed before the executable.
    pub extra_args: Vec<String>,
}

impl MpiRunner {
    pub fn new(launcher: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            hostfile: None,
            executable: executable.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_hostfile(mut self, hostfile: impl Into<PathBuf>) -> Self {
        self.hostfile = Some(hostfile.into());
        self
    }

    fn args(&self, altitudes: &[f64], knob: Knob) -> Vec<OsString> {
        let (count, selector) = match knob {
            Knob::Processes(count) => (count, None),
            Knob::Variant(selector) => (1, Some(selector)),
        };
        let mut args: Vec<OsString> = Vec::new();
        if let Some(hostfile) = self.hostfile.as_ref() {
            args.push("--hostfile".into());
            args.push(hostfile.clone().into_os_string());
        }
        args.push("-np".into());
        args.push(count.to_string().into());
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(self.executable.clone().into_os_string());
        args.push(encode_altitudes(altitudes).into());
        if let Some(selector) = selector {
            args.push(selector.to_string().into());
        }
        args
    }
}

impl Runner for MpiRunner {
    fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError> {
        let args = self.args(altitudes, knob);
        run_command(OsString::from(&self.launcher), args)
    }
}

fn run_command(program: OsString, args: Vec<OsString>) -> Result<String, HarnessError> {
    let name = program.to_string_lossy().into_owned();
    debug!("invoking {} {:?}", name, args);
    let output = Command::new(&program)
        .args(&args)
        .output()
        .map_err(|source| HarnessError::Launch {
            program: name.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(HarnessError::ProcessFailed {
            program: name,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    let stdout = String::from_utf8(output.stdout)
        .map_err(|_| HarnessError::MalformedOutput(format!("{name} wrote non UTF-8 output")))?;
    first_line(&stdout)
        .map(str::to_owned)
        .ok_or_else(|| HarnessError::MalformedOutput(format!("{name} produced no output")))
}

fn first_line(stdout: &str) -> Option<&str> {
    stdout
        .trim()
        .split('\n')
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_integral_altitudes_without_fraction() {
        assert_eq!(encode_altitudes(&[1.0, 20.0, 300.0]), "1,20,300");
        assert_eq!(encode_altitudes(&[1.5]), "1.5");
    }

    #[test]
    fn first_line_skips_surrounding_whitespace() {
        assert_eq!(first_line("\n _,v,u \nextra\n"), Some("_,v,u"));
        assert_eq!(first_line("  \n"), None);
    }

    #[test]
    fn mpi_arguments_follow_launcher_convention() {
        let runner = MpiRunner::new("mpirun", "vid").with_hostfile("hostfile");
        let args = runner.args(&[1.0, 2.0], Knob::Processes(3));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["--hostfile", "hostfile", "-np", "3", "vid", "1,2"]);

        let plain = MpiRunner::new("mpirun", "vid");
        let args = plain.args(&[4.0], Knob::Variant(2));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-np", "1", "vid", "4", "2"]);
    }

    #[cfg(unix)]
    #[test]
    fn command_runner_returns_first_stdout_line() {
        let mut runner = CommandRunner::new("echo");
        let line = runner.run(&[3.0, 1.0], Knob::Variant(2)).unwrap();
        assert_eq!(line, "3,1 2");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_process_failure() {
        let mut runner = CommandRunner::new("false");
        let err = runner.run(&[1.0], Knob::Variant(1)).unwrap_err();
        assert!(matches!(err, HarnessError::ProcessFailed { .. }));
    }

    #[test]
    fn missing_program_is_a_launch_failure() {
        let mut runner = CommandRunner::new("/nonexistent/los-harness-target");
        let err = runner.run(&[1.0], Knob::Variant(1)).unwrap_err();
        assert!(matches!(err, HarnessError::Launch { .. }));
    }
}

//! Subprocess execution and the serial task runner.
//!
//! Every external command the export pipeline runs (package builds, installs,
//! bundlers, container tools) goes through [`Task`] and [`TaskRunner`] so that
//! output is captured verbatim and a non-optional failure aborts the export
//! with the subprocess exit code preserved.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};
use thiserror::Error;

/// A subprocess failure with everything needed to show the user what ran.
#[derive(Debug, Error)]
#[error("command `{command}` failed in {cwd} with exit code {code:?}\n--- stdout\n{stdout}--- stderr\n{stderr}")]
pub struct TaskError {
    pub command: String,
    pub cwd: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Builder for a single external process invocation.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Render the command line for log and error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Execute the command with captured output and wait for completion.
    pub fn exec(&self) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("running `{}`", self.display_command());

        cmd.output()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))
    }

    /// Execute and turn a non-zero exit status into a [`TaskError`].
    pub fn exec_checked(&self) -> Result<Output, anyhow::Error> {
        let output = self.exec()?;
        if !output.status.success() {
            return Err(self.failure(&output).into());
        }
        Ok(output)
    }

    /// Build the [`TaskError`] for a failed invocation.
    pub fn failure(&self, output: &Output) -> TaskError {
        TaskError {
            command: self.display_command(),
            cwd: self
                .cwd
                .as_deref()
                .unwrap_or(Path::new("."))
                .display()
                .to_string(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// One step of the export pipeline that shells out.
#[derive(Debug, Clone)]
pub struct Task {
    /// Short human label used in progress logging.
    pub label: String,
    /// The process to run.
    pub process: ProcessBuilder,
    /// Optional tasks log their failure and let the pipeline continue.
    pub optional: bool,
}

impl Task {
    /// Create a required task.
    pub fn new(label: impl Into<String>, process: ProcessBuilder) -> Self {
        Task {
            label: label.into(),
            process,
            optional: false,
        }
    }

    /// Mark this task as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Serial executor of external processes. Tasks run strictly in order; the
/// build systems behind them are not required to be re-entrant.
#[derive(Debug, Default)]
pub struct TaskRunner;

impl TaskRunner {
    pub fn new() -> Self {
        TaskRunner
    }

    /// Run a single task, returning its captured output.
    pub fn run(&self, task: &Task) -> Result<Output> {
        tracing::info!("{}", task.label);
        let output = task.process.exec()?;
        if !output.status.success() {
            if task.optional {
                tracing::warn!(
                    "optional task `{}` failed: {}",
                    task.label,
                    task.process.failure(&output)
                );
                return Ok(output);
            }
            return Err(task.process.failure(&output).into());
        }
        Ok(output)
    }

    /// Run tasks in order, aborting on the first non-optional failure.
    pub fn run_all(&self, tasks: &[Task]) -> Result<()> {
        for task in tasks {
            self.run(task)?;
        }
        Ok(())
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_captures_output() {
        let output = ProcessBuilder::new("echo").arg("hello").exec().unwrap();

        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("hello"));
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("yarn").args(["install", "--production"]);

        assert_eq!(pb.display_command(), "yarn install --production");
    }

    #[test]
    fn test_runner_aborts_on_required_failure() {
        let runner = TaskRunner::new();
        let fail = Task::new("fail", ProcessBuilder::new("false"));
        let after = Task::new("after", ProcessBuilder::new("true"));

        let err = runner.run_all(&[fail, after]).unwrap_err();
        let task_err = err.downcast_ref::<TaskError>().unwrap();
        assert_eq!(task_err.command, "false");
        assert_eq!(task_err.code, Some(1));
    }

    #[test]
    fn test_runner_continues_past_optional_failure() {
        let runner = TaskRunner::new();
        let fail = Task::new("fail", ProcessBuilder::new("false")).optional();
        let after = Task::new("after", ProcessBuilder::new("true"));

        runner.run_all(&[fail, after]).unwrap();
    }
}

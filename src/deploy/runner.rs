//! External command execution for the deployment steps.

use std::{
    fmt, io,
    path::PathBuf,
    process::{Command, Stdio},
};

/// One CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; the caller's when `None`.
    pub cwd: Option<PathBuf>,
    /// Capture stderr instead of passing it through to the terminal.
    pub capture_stderr: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            capture_stderr: false,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn capture_stderr(mut self) -> Self {
        self.capture_stderr = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a finished command went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Captured stderr; empty unless capture was requested.
    pub stderr: String,
}

/// Runs commands to completion. `Err` means the process could not be spawned.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome>;
}

/// Runs commands on the host, inheriting stdin and stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(if spec.capture_stderr {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let output = command.output()?;
        Ok(CommandOutcome {
            success: output.status.success(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("gsutil", ["ls", "-b", "gs://bucket"]);
        assert_eq!(spec.to_string(), "gsutil ls -b gs://bucket");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-gcp-console", Vec::<String>::new());
        assert!(ShellRunner.run(&spec).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn captured_stderr_and_exit_code_are_reported() {
        let spec = CommandSpec::new("sh", ["-c", "echo BucketNotFoundException 1>&2; exit 3"])
            .capture_stderr();
        let outcome = ShellRunner.run(&spec).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.code, Some(3));
        assert!(outcome.stderr.contains("BucketNotFoundException"));
    }
}

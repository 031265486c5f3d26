use crate::job::JobRecord;
use chrono::DateTime;
use chrono::Utc;
use log::error;
use std::path::PathBuf;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Output;
use std::process::Stdio;
use typed_builder::TypedBuilder;

/// Everything captured from one run of a job's program.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Execution {
    /// Copies the captured results into the job record.
    pub fn record_into(self, record: &mut JobRecord) {
        record.stdout = Some(self.stdout);
        record.stderr = Some(self.stderr);
        record.exit_code = self.exit_code;
        record.error = self.error;
        record.started_at = Some(self.started_at);
        record.finished_at = Some(self.finished_at);
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs job command lines as child processes.
///
/// The child's stdin is closed, both output streams are read to the end and
/// the call blocks until the child exits. No timeout is applied.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct Executor {
    /// Working directory of the child, the worker's own if not set.
    #[builder(default, setter(strip_option, into))]
    pub current_dir: Option<PathBuf>,
}

impl Executor {
    /// Executes the command line. A non-zero exit code is not an error here,
    /// it is just recorded.
    pub fn execute(&self, arguments: &[String]) -> Execution {
        let started_at = Utc::now();

        let result = match arguments.split_first() {
            Some((program, args)) => {
                let mut command = Command::new(program);

                command
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());

                if let Some(ref dir) = self.current_dir {
                    command.current_dir(dir);
                }

                // output() drains both pipes concurrently and closes every
                // handle before returning, on success and on failure
                command
                    .output()
                    .map_err(|err| format!("failed to start {program}: {err}"))
            }
            None => Err("the job has no arguments".to_string()),
        };

        let finished_at = Utc::now();

        match result {
            Ok(output) => Self::process_output(output, started_at, finished_at),
            Err(message) => {
                error!("{message}");

                Execution {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    error: Some(message),
                    started_at,
                    finished_at,
                }
            }
        }
    }

    fn process_output(
        output: Output,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Execution {
        let exit_code = output.status.code();
        let error = match exit_code {
            Some(_) => None,
            None => Some(describe_termination(output.status)),
        };

        Execution {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
            error,
            started_at,
            finished_at,
        }
    }
}

#[cfg(unix)]
fn describe_termination(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(signal) => format!("terminated by signal {signal}"),
        None => format!("terminated without exit code ({status})"),
    }
}

#[cfg(not(unix))]
fn describe_termination(status: ExitStatus) -> String {
    format!("terminated without exit code ({status})")
}

//! Checked invocation of external programs.
//!
//! Every run inspects the exit status and the files the caller expects the
//! program to write. A run that exits nonzero, leaves an expected output
//! missing or empty, outlives its deadline, or is cancelled is an error.

use crate::{CancelToken, ToolError};
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// How often a running child is checked for exit, deadline and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Maximum stderr bytes carried into an error message.
const STDERR_TAIL_BYTES: usize = 2048;

/// Captured output of a successful run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// An external program invocation with result checking.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
    expected_outputs: Vec<PathBuf>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl ToolCommand {
    /// Start building an invocation of `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            expected_outputs: Vec::new(),
            deadline: None,
            cancel: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed these bytes to the child's stdin.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Require `path` to exist and be non-empty after a successful exit.
    pub fn expect_output(mut self, path: impl AsRef<Path>) -> Self {
        self.expected_outputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Kill the child if it is still running at `deadline`.
    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Kill the child if `token` is cancelled.
    pub fn cancel_token(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the program to completion and check its results.
    pub fn run(&self) -> Result<ToolOutput, ToolError> {
        debug!("running {} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let stdin_writer = match (child.stdin.take(), self.stdin.clone()) {
            (Some(mut pipe), Some(bytes)) => Some(thread::spawn(move || {
                // A child that exits early closes the pipe; its status tells the story.
                let _ = pipe.write_all(&bytes);
            })),
            _ => None,
        };
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let status = self.supervise(&mut child);

        if let Some(handle) = stdin_writer {
            let _ = handle.join();
        }
        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);

        let status = status?;
        if !status.success() {
            return Err(ToolError::NonZeroExit {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: tail(&stderr),
            });
        }

        for path in &self.expected_outputs {
            let metadata = std::fs::metadata(path).map_err(|_| ToolError::MissingOutput {
                program: self.program.clone(),
                path: path.clone(),
            })?;
            if metadata.len() == 0 {
                return Err(ToolError::EmptyOutput {
                    program: self.program.clone(),
                    path: path.clone(),
                });
            }
        }

        Ok(ToolOutput { stdout, stderr })
    }

    /// Wait for the child, killing it on deadline or cancellation.
    fn supervise(&self, child: &mut Child) -> Result<ExitStatus, ToolError> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                kill(child);
                return Err(ToolError::Cancelled {
                    program: self.program.clone(),
                });
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                kill(child);
                return Err(ToolError::DeadlineExceeded {
                    program: self.program.clone(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_success_captures_stdout() {
        let out = ToolCommand::new("sh")
            .args(["-c", "echo hello"])
            .run()
            .expect("sh should run");
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run()
            .unwrap_err();
        match err {
            ToolError::NonZeroExit { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let err = ToolCommand::new("definitely-not-a-real-program-xyz").run().unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[test]
    fn test_expected_output_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let err = ToolCommand::new("true").expect_output(&path).run().unwrap_err();
        assert!(matches!(err, ToolError::MissingOutput { .. }));

        let script = format!("echo data > '{}'", path.display());
        ToolCommand::new("sh")
            .args(["-c", script.as_str()])
            .expect_output(&path)
            .run()
            .expect("output written");
    }

    #[test]
    fn test_empty_output_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        let script = format!(": > '{}'", path.display());
        let err = ToolCommand::new("sh")
            .args(["-c", script.as_str()])
            .expect_output(&path)
            .run()
            .unwrap_err();
        assert!(matches!(err, ToolError::EmptyOutput { .. }));
    }

    #[test]
    fn test_deadline_kills_child() {
        let start = Instant::now();
        let err = ToolCommand::new("sleep")
            .arg("5")
            .deadline(Some(Instant::now() + Duration::from_millis(100)))
            .run()
            .unwrap_err();
        assert!(matches!(err, ToolError::DeadlineExceeded { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_cancelled_token_kills_child() {
        let token = CancelToken::new();
        token.cancel();
        let err = ToolCommand::new("sleep")
            .arg("5")
            .cancel_token(&token)
            .run()
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled { .. }));
    }

    #[test]
    fn test_stdin_is_fed() {
        let out = ToolCommand::new("cat").stdin("piped text").run().unwrap();
        assert_eq!(out.stdout, "piped text");
    }
}

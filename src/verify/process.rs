//! Bounded external tool invocation.
//!
//! `wait-timeout` bounds the child, not our reads of its pipes. Stdin is fed
//! and stdout/stderr are drained on short-lived threads that hand their
//! bytes back over channels, so a tool stuck on a full pipe is still killed
//! at the deadline and a killed tool never leaves us blocked on `read`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Captured output is truncated to this many bytes per stream.
const MAX_OUTPUT_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Verification stage this call belongs to, for logs and fakes.
    pub stage: &'static str,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(stage: &'static str, program: impl Into<PathBuf>, cwd: &Path, timeout: Duration) -> Self {
        Self {
            stage,
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed { success: bool, output: String },
    TimedOut,
    /// The program is not installed.
    NotFound,
    /// Spawning or waiting failed for another reason.
    Failed(String),
}

pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> ToolOutcome;
}

/// Runs real processes, killing them when the timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn read_bounded(mut reader: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buf.len() < MAX_OUTPUT_BYTES {
                    let take = n.min(MAX_OUTPUT_BYTES - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    buf
}

impl ToolRunner for SystemRunner {
    fn run(&self, inv: &ToolInvocation) -> ToolOutcome {
        let mut child = match Command::new(&inv.program)
            .args(&inv.args)
            .current_dir(&inv.cwd)
            .stdin(if inv.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ToolOutcome::NotFound,
            Err(e) => return ToolOutcome::Failed(format!("failed to spawn {}: {e}", inv.program_name())),
        };

        // Feed stdin and drain both output pipes on their own threads so a
        // tool blocked on a full pipe still falls under the timeout.
        if let (Some(input), Some(mut pipe)) = (inv.stdin.clone(), child.stdin.take()) {
            std::thread::spawn(move || {
                // A tool that exits early closes the pipe; not our failure.
                let _ = pipe.write_all(input.as_bytes());
            });
        }

        let (out_tx, out_rx) = mpsc::channel();
        let (err_tx, err_rx) = mpsc::channel();
        let stdout_thread = child.stdout.take().map(|out| {
            std::thread::spawn(move || {
                let _ = out_tx.send(read_bounded(out));
            })
        });
        let stderr_thread = child.stderr.take().map(|err| {
            std::thread::spawn(move || {
                let _ = err_tx.send(read_bounded(err));
            })
        });

        let status = match child.wait_timeout(inv.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(stage = inv.stage, program = %inv.program_name(), "tool timed out");
                return ToolOutcome::TimedOut;
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return ToolOutcome::Failed(format!("failed to wait for {}: {e}", inv.program_name()));
            }
        };

        if let Some(t) = stdout_thread {
            let _ = t.join();
        }
        if let Some(t) = stderr_thread {
            let _ = t.join();
        }
        let stdout = out_rx.recv().unwrap_or_default();
        let stderr = err_rx.recv().unwrap_or_default();

        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&stderr);
        }

        ToolOutcome::Completed {
            success: status.success(),
            output,
        }
    }
}

use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use crate::action::CommandSpec;
use crate::config::CommandConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to wait for pipes to drain once the child is gone. Grandchildren
/// that inherited the pipes can keep them open indefinitely.
const PIPE_GRACE: Duration = Duration::from_millis(250);
const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(i32),
    /// Ended without an exit code, e.g. killed by a signal.
    Terminated,
    TimedOut,
    SpawnFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub lines: Vec<String>,
    pub status: CommandStatus,
}

impl CommandOutput {
    pub fn new(lines: Vec<String>, status: CommandStatus) -> Self {
        Self { lines, status }
    }

    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Exited(0)
    }

    /// Lines worth revealing: blank ones are dropped.
    pub fn visible_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|line| !line.trim().is_empty())
    }
}

/// Source of command output for `RunAndReveal`. Never fails: problems degrade
/// to fewer lines.
pub trait CommandRunner {
    fn run(&mut self, spec: &CommandSpec) -> CommandOutput;
}

/// Runs real processes with a timeout and captures stdout followed by stderr.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    mode_flag: Option<String>,
    cwd: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            mode_flag: config
                .mode_flag
                .as_deref()
                .map(str::trim)
                .filter(|flag| !flag.is_empty())
                .map(str::to_owned),
            cwd: config.cwd.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn invocation_args(&self, spec: &CommandSpec) -> Vec<String> {
        let mut args = spec.args.clone();
        if let Some(flag) = &self.mode_flag {
            args.push(flag.clone());
        }
        args
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, spec: &CommandSpec) -> CommandOutput {
        let args = self.invocation_args(spec);
        let mut command = Command::new(&spec.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let started = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let reason = if error.kind() == ErrorKind::NotFound {
                    format!("executable '{}' not found", spec.program)
                } else {
                    format!("failed to spawn '{}': {error}", spec.program)
                };
                warn!(
                    command = %spec.display(),
                    %reason,
                    "command did not start; revealing nothing"
                );
                return CommandOutput::new(Vec::new(), CommandStatus::SpawnFailed(reason));
            }
        };

        let stdout = child.stdout.take().map(|pipe| PipeCapture::spawn(pipe, "stdout"));
        let stderr = child.stderr.take().map(|pipe| PipeCapture::spawn(pipe, "stderr"));

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status_of(status),
                Ok(None) => {}
                Err(error) => {
                    warn!(command = %spec.display(), %error, "failed polling command");
                    let _ = child.kill();
                    let _ = child.wait();
                    break CommandStatus::Terminated;
                }
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                break CommandStatus::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout.map(PipeCapture::finish).unwrap_or_default();
        let stderr = stderr.map(PipeCapture::finish).unwrap_or_default();
        let lines = output_lines(
            &String::from_utf8_lossy(&stdout),
            &String::from_utf8_lossy(&stderr),
        );

        match &status {
            CommandStatus::Exited(0) => debug!(
                command = %spec.display(),
                lines = lines.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "command finished"
            ),
            CommandStatus::TimedOut => warn!(
                command = %spec.display(),
                timeout_ms = self.timeout.as_millis() as u64,
                lines = lines.len(),
                "command timed out; revealing partial output"
            ),
            other => warn!(
                command = %spec.display(),
                status = ?other,
                lines = lines.len(),
                "command failed; revealing captured output"
            ),
        }

        CommandOutput::new(lines, status)
    }
}

fn status_of(status: ExitStatus) -> CommandStatus {
    match status.code() {
        Some(code) => CommandStatus::Exited(code),
        None => CommandStatus::Terminated,
    }
}

/// Accumulates a child pipe on a helper thread so a timeout can still read
/// whatever arrived so far.
struct PipeCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl PipeCapture {
    fn spawn<R: Read + Send + 'static>(mut pipe: R, label: &str) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = mpsc::channel();
        let sink = Arc::clone(&buffer);

        let spawned = thread::Builder::new()
            .name(format!("termreel-{label}"))
            .spawn(move || {
                let mut chunk = [0_u8; 4096];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(read) => {
                            if let Ok(mut buffer) = sink.lock() {
                                buffer.extend_from_slice(&chunk[..read]);
                            }
                        }
                        Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = done_tx.send(());
            });
        if let Err(error) = spawned {
            warn!(%error, pipe = label, "failed to spawn pipe reader; output will be empty");
        }

        Self { buffer, done }
    }

    fn finish(self) -> Vec<u8> {
        let _ = self.done.recv_timeout(PIPE_GRACE);
        match self.buffer.lock() {
            Ok(buffer) => buffer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Joins stdout and stderr (stderr after stdout) into display lines: escape
/// sequences removed, tabs expanded, trailing blank lines dropped.
pub fn output_lines(stdout: &str, stderr: &str) -> Vec<String> {
    let mut text = stdout.trim_end().to_owned();
    let stderr = stderr.trim_end();
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }

    let cleaned = strip_ansi(&text);
    let mut lines = cleaned
        .lines()
        .map(|line| line.replace('\t', &" ".repeat(TAB_WIDTH)))
        .collect::<Vec<_>>();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines
}

fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").ok()
    });
    match pattern {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_owned(),
    }
}

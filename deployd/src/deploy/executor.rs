//! Step executor: runs one external command and streams its output

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::ExecError;
use crate::models::pipeline::StepCommand;

/// Number of stderr lines kept for failure classification
const STDERR_TAIL_LINES: usize = 20;

/// How long output is still collected after the step process exited
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output, without its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stream {
            OutputStream::Stdout => f.write_str(&self.text),
            OutputStream::Stderr => write!(f, "[stderr] {}", self.text),
        }
    }
}

/// Receives output lines in the order the executor observed them
#[async_trait]
pub trait LineSink: Send {
    async fn line(&mut self, line: OutputLine);
}

#[async_trait]
impl LineSink for Vec<OutputLine> {
    async fn line(&mut self, line: OutputLine) {
        self.push(line);
    }
}

/// Runs a single external step. Implementations never retry.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run(&self, command: &StepCommand, sink: &mut dyn LineSink) -> Result<(), ExecError>;
}

/// Executor backed by local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn run(&self, command: &StepCommand, sink: &mut dyn LineSink) -> Result<(), ExecError> {
        debug!("Running step command: {}", command);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        // Both pipes funnel into one channel so the sink sees a single ordered stream
        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let drive = async {
            // Completion is the process exit, not EOF: a background child may
            // keep the pipes open long after the step itself is done
            let waited = loop {
                tokio::select! {
                    biased;
                    line = rx.recv() => match line {
                        Some(line) => deliver(sink, &mut stderr_tail, line).await,
                        None => break child.wait().await,
                    },
                    waited = child.wait() => break waited,
                }
            };

            // Collect what the step wrote before exiting
            let deadline = tokio::time::Instant::now() + OUTPUT_GRACE;
            while let Ok(Some(line)) = tokio::time::timeout_at(deadline, rx.recv()).await {
                deliver(sink, &mut stderr_tail, line).await;
            }
            waited
        };

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, drive).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!("Step '{}' timed out after {:?}, killing it", command.program, limit);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill timed out step '{}': {}", command.program, e);
                    }
                    return Err(ExecError::TimedOut {
                        program: command.program.clone(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => drive.await,
        };

        let status = waited.map_err(|source| ExecError::Io {
            program: command.program.clone(),
            source,
        })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ExecError::NonZeroExit {
                program: command.program.clone(),
                code,
                stderr_tail: stderr_tail.into_iter().collect(),
            }),
            None => Err(ExecError::Terminated {
                program: command.program.clone(),
            }),
        }
    }
}

async fn deliver(sink: &mut dyn LineSink, stderr_tail: &mut VecDeque<String>, line: OutputLine) {
    if line.stream == OutputStream::Stderr {
        if stderr_tail.len() == STDERR_TAIL_LINES {
            stderr_tail.pop_front();
        }
        stderr_tail.push_back(line.text.clone());
    }
    sink.line(line).await;
}

/// Read `reader` line by line and forward each line. A trailing line without
/// terminator is still delivered at EOF.
async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(OutputLine { stream, text }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

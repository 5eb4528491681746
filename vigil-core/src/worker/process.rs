use std::{path::PathBuf, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tracing::{debug, trace};

use super::{WorkerError, WorkerReply, WorkerRequest};

/// How to launch one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line on whitespace. `None` when it is blank.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts.map(str::to_string).collect()))
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// One live worker. Dropping it kills the process.
#[derive(Debug)]
pub(super) struct WorkerProcess {
    id: u64,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl WorkerProcess {
    pub(super) fn spawn(id: u64, command: &WorkerCommand) -> Result<Self, WorkerError> {
        let spawn_error = |source| WorkerError::Spawn {
            program: command.display(),
            source,
        };
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let missing = || WorkerError::Protocol("worker stdio was not piped".into());
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        debug!(worker = id, pid = ?child.id(), program = %command.display(), "worker spawned");

        Ok(Self {
            id,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send one request and wait for its reply line.
    pub(super) async fn roundtrip(
        &mut self,
        request: &WorkerRequest,
    ) -> Result<WorkerReply, WorkerError> {
        let mut payload = serde_json::to_vec(request)
            .map_err(|err| WorkerError::Protocol(err.to_string()))?;
        payload.push(b'\n');

        let crashed = |id, reason: String| WorkerError::Crashed { id, reason };
        self.stdin
            .write_all(&payload)
            .await
            .map_err(|err| crashed(self.id, format!("write failed: {err}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|err| crashed(self.id, format!("flush failed: {err}")))?;

        self.line.clear();
        let read = self
            .stdout
            .read_line(&mut self.line)
            .await
            .map_err(|err| crashed(self.id, format!("read failed: {err}")))?;
        if read == 0 {
            let status = self.child.try_wait().ok().flatten();
            return Err(crashed(
                self.id,
                match status {
                    Some(status) => format!("exited with {status}"),
                    None => "closed its output".to_string(),
                },
            ));
        }
        trace!(worker = self.id, op = request.op(), "worker replied");

        serde_json::from_str(self.line.trim_end())
            .map_err(|err| WorkerError::Protocol(format!("bad reply line: {err}")))
    }

    /// Kill and reap the process.
    pub(super) async fn terminate(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        debug!(worker = self.id, "worker terminated");
    }
}

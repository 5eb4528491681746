use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use tokio::{
    io::AsyncWriteExt,
    process::{ChildStdin, Command},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{ExtractError, FrameExtractor};
use crate::fetch::{BodyStream, FetchError};

const STDERR_TAIL: usize = 512;

/// [`FrameExtractor`] that shells out to ffmpeg. Children are spawned with
/// `kill_on_drop`, so abandoning an extraction (timeout, cancellation)
/// kills the process.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    ffmpeg_path: PathBuf,
    seek_offset: Duration,
    timeout: Duration,
}

/// How feeding the child's stdin ended.
#[derive(Debug)]
enum FeedOutcome {
    Complete,
    /// The child stopped reading, normally because it already has a frame.
    ClosedEarly,
    /// The input cap was reached before the stream ended.
    Truncated,
    Source(FetchError),
    Io(io::Error),
}

impl FfmpegFrameExtractor {
    pub fn new(
        ffmpeg_path: impl Into<PathBuf>,
        seek_offset: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            seek_offset,
            timeout,
        }
    }

    fn seek_arg(&self) -> String {
        format!("{:.3}", self.seek_offset.as_secs_f64())
    }

    fn pipe_command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(self.seek_arg())
            .args(["-i", "pipe:0", "-frames:v", "1"])
            .args(["-f", "image2pipe", "-c:v", "mjpeg", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn file_command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-ss"])
            .arg(self.seek_arg())
            .arg("-i")
            .arg(input)
            .args(["-frames:v", "1", "-f", "image2", "-c:v", "mjpeg"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn bounded<T, F>(
        &self,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, ExtractError>
    where
        F: Future<Output = Result<T, ExtractError>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, work) => {
                outcome.unwrap_or(Err(ExtractError::Timeout(self.timeout)))
            }
        }
    }
}

async fn feed_stdin(
    mut stdin: ChildStdin,
    mut input: BodyStream,
    max_input: u64,
) -> FeedOutcome {
    let mut written: u64 = 0;
    while let Some(chunk) = input.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => return FeedOutcome::Source(err),
        };
        let room = max_input.saturating_sub(written);
        let take = chunk.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        if let Err(err) = stdin.write_all(&chunk[..take]).await {
            return match err.kind() {
                io::ErrorKind::BrokenPipe => FeedOutcome::ClosedEarly,
                _ => FeedOutcome::Io(err),
            };
        }
        written += take as u64;
        if take < chunk.len() || written >= max_input {
            return FeedOutcome::Truncated;
        }
    }
    match stdin.shutdown().await {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            FeedOutcome::ClosedEarly
        }
        _ => FeedOutcome::Complete,
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((cut, _)) => text[cut..].to_string(),
        None => text.to_string(),
    }
}

fn exit_error(output: &Output) -> ExtractError {
    ExtractError::Exit {
        code: output.status.code(),
        stderr: stderr_tail(&output.stderr),
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn from_stream(
        &self,
        input: BodyStream,
        max_input: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError> {
        let mut child = self.pipe_command().spawn().map_err(ExtractError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("ffmpeg stdin was not piped"))?;

        self.bounded(cancel, async move {
            let feed = feed_stdin(stdin, input, max_input);
            let wait = child.wait_with_output();
            tokio::pin!(feed, wait);

            let (feed, output) = tokio::select! {
                output = &mut wait => {
                    let output = output?;
                    if output.status.success() && !output.stdout.is_empty() {
                        // Dropping the feeder drops the body stream with it.
                        trace!(status = ?output.status, "ffmpeg finished before its input");
                        return Ok(Bytes::from(output.stdout));
                    }
                    (feed.as_mut().now_or_never(), output)
                }
                feed = &mut feed => (Some(feed), wait.as_mut().await?),
            };
            trace!(?feed, status = ?output.status, "ffmpeg pipe run finished");

            if output.status.success() && !output.stdout.is_empty() {
                return Ok(Bytes::from(output.stdout));
            }
            match feed {
                Some(FeedOutcome::Source(err)) => Err(ExtractError::Input(err)),
                Some(FeedOutcome::Io(err)) => Err(ExtractError::Io(err)),
                _ if !output.status.success() => Err(exit_error(&output)),
                _ => Err(ExtractError::NoFrame),
            }
        })
        .await
    }

    async fn from_bytes(
        &self,
        input: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError> {
        let len = input.len() as u64;
        let stream: BodyStream =
            Box::pin(futures::stream::once(async move { Ok(input) }));
        self.from_stream(stream, len, cancel).await
    }

    async fn from_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        let child = self
            .file_command(input, output)
            .spawn()
            .map_err(ExtractError::Spawn)?;

        self.bounded(cancel, async move {
            let run = child.wait_with_output().await?;
            if !run.status.success() {
                return Err(exit_error(&run));
            }
            match tokio::fs::metadata(output).await {
                Ok(meta) if meta.len() > 0 => {
                    debug!(output = %output.display(), bytes = meta.len(), "frame written");
                    Ok(())
                }
                Ok(_) => Err(ExtractError::NoFrame),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(ExtractError::NoFrame)
                }
                Err(err) => Err(ExtractError::Io(err)),
            }
        })
        .await
    }
}

//! `vigil-server worker`: the image transform side of the worker protocol.
//!
//! One request per line on the reader, one reply per line on the writer.
//! Failures are reported as `error` replies and the loop keeps going; only
//! I/O on the protocol channel itself ends it.

use std::{io, path::PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use vigil_core::{
    NormalizeSettings,
    transform::normalize_image,
    worker::{WorkerReply, WorkerRequest},
};

pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    settings: NormalizeSettings,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                debug!(op = request.op(), "worker request");
                handle(request, settings).await
            }
            Err(err) => WorkerReply::error(format!("malformed request: {err}")),
        };
        if let WorkerReply::Error { message } = &reply {
            warn!(%message, "worker request failed");
        }

        let mut encoded = serde_json::to_vec(&reply).map_err(io::Error::other)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn handle(request: WorkerRequest, settings: NormalizeSettings) -> WorkerReply {
    match request {
        WorkerRequest::Normalize { data } => match normalize(data, settings).await {
            Ok(encoded) => WorkerReply::Normalized {
                data: Bytes::from(encoded),
            },
            Err(message) => WorkerReply::error(message),
        },
        WorkerRequest::NormalizeFile { input, output } => {
            match normalize_file(input, output, settings).await {
                Ok(reply) => reply,
                Err(message) => WorkerReply::error(message),
            }
        }
        other => WorkerReply::error(format!(
            "operation `{}` is not served by the transform worker",
            other.op()
        )),
    }
}

async fn normalize(data: Bytes, settings: NormalizeSettings) -> Result<Vec<u8>, String> {
    tokio::task::spawn_blocking(move || normalize_image(&data, &settings))
        .await
        .map_err(|join| format!("normalize task failed: {join}"))?
        .map_err(|err| err.to_string())
}

async fn normalize_file(
    input: PathBuf,
    output: PathBuf,
    settings: NormalizeSettings,
) -> Result<WorkerReply, String> {
    let data = tokio::fs::read(&input)
        .await
        .map_err(|err| format!("failed to read {}: {err}", input.display()))?;
    let encoded = normalize(Bytes::from(data), settings).await?;
    tokio::fs::write(&output, &encoded)
        .await
        .map_err(|err| format!("failed to write {}: {err}", output.display()))?;
    Ok(WorkerReply::Written {
        output,
        bytes: encoded.len() as u64,
    })
}

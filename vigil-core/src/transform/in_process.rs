use std::{io::Cursor, path::Path};

use async_trait::async_trait;
use bytes::Bytes;
use image::{
    ExtendedColorType, ImageEncoder, ImageReader, Limits, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use tokio_util::sync::CancellationToken;

use super::Transcoder;
use crate::error::{PipelineError, Result};

const MAX_DECODE_EDGE: u32 = 16_384;
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeSettings {
    /// Edge length of the square model input.
    pub dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            dimension: 224,
            jpeg_quality: 90,
        }
    }
}

/// Decode any supported format, resize to `dimension` x `dimension` and
/// encode as RGB JPEG. Blocking; call from a blocking context.
pub fn normalize_image(
    data: &[u8],
    settings: &NormalizeSettings,
) -> image::ImageResult<Vec<u8>> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_EDGE);
    limits.max_image_height = Some(MAX_DECODE_EDGE);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    reader.limits(limits);
    let decoded = reader.decode()?;

    let edge = settings.dimension.max(1);
    let resized = decoded
        .resize_exact(edge, edge, FilterType::Lanczos3)
        .to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, settings.jpeg_quality).write_image(
        resized.as_raw(),
        edge,
        edge,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out.into_inner())
}

/// [`Transcoder`] that runs on the blocking thread pool of this process.
///
/// Cancellation abandons the result; the blocking task itself runs to
/// completion since threads cannot be interrupted.
#[derive(Debug, Clone, Default)]
pub struct InProcessTranscoder {
    settings: NormalizeSettings,
}

impl InProcessTranscoder {
    pub fn new(settings: NormalizeSettings) -> Self {
        Self { settings }
    }

    async fn run(&self, data: Bytes, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let settings = self.settings;
        let task = tokio::task::spawn_blocking(move || normalize_image(&data, &settings));
        match cancel.run_until_cancelled(task).await {
            None => Err(PipelineError::Cancelled),
            Some(Err(join)) => Err(PipelineError::Processing(format!(
                "normalize task failed: {join}"
            ))),
            Some(Ok(Err(err))) => Err(PipelineError::Processing(err.to_string())),
            Some(Ok(Ok(encoded))) => Ok(encoded),
        }
    }
}

#[async_trait]
impl Transcoder for InProcessTranscoder {
    async fn normalize(&self, data: Bytes, cancel: &CancellationToken) -> Result<Bytes> {
        self.run(data, cancel).await.map(Bytes::from)
    }

    async fn normalize_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let data = tokio::fs::read(input).await.map_err(|err| {
            PipelineError::Processing(format!("read {}: {err}", input.display()))
        })?;
        let encoded = self.run(Bytes::from(data), cancel).await?;
        tokio::fs::write(output, &encoded).await.map_err(|err| {
            PipelineError::Processing(format!("write {}: {err}", output.display()))
        })?;
        Ok(encoded.len() as u64)
    }
}

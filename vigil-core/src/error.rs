use std::fmt;

use thiserror::Error;

use crate::{extract::ExtractError, fetch::FetchError};

/// Where in acquisition a failure happened. Only the stage of the last
/// attempted strategy is ever surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStage {
    /// Single bounded download of a non-video resource.
    Download,
    /// Writing an inline payload into the work directory.
    InlineStore,
    /// Tier 3 download to a temp file.
    FinalDownload,
    /// Tier 3 frame extraction from the temp file.
    FinalScreenshot,
    /// Tier 3 reading the extracted frame back.
    FinalRead,
}

impl fmt::Display for AcquireStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AcquireStage::Download => "media download failed",
            AcquireStage::InlineStore => "inline payload storage failed",
            AcquireStage::FinalDownload => "final fallback download failed",
            AcquireStage::FinalScreenshot => {
                "final fallback screenshot generation failed"
            }
            AcquireStage::FinalRead => "final fallback screenshot read failed",
        })
    }
}

/// Low-level acquisition failure, before a stage is attached.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl AcquireError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AcquireError::Cancelled
                | AcquireError::Extract(ExtractError::Cancelled)
        )
    }

    /// Whether the failure came from talking to the remote server rather
    /// than from local processing.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AcquireError::Fetch(
                FetchError::Transport { .. } | FetchError::Timeout(_)
            )
        )
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Media acquisition failed ({stage}): {source}")]
    Acquisition {
        stage: AcquireStage,
        #[source]
        source: AcquireError,
    },

    #[error("Image processing failed: {0}")]
    Processing(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn acquisition(stage: AcquireStage, source: AcquireError) -> Self {
        if source.is_cancelled() {
            return PipelineError::Cancelled;
        }
        PipelineError::Acquisition { stage, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

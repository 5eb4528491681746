use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::ModelError, fingerprint::ContentFingerprint};

/// How the caller supplied the media.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Url,
    Data,
}

impl RequestKind {
    pub fn namespace(self) -> &'static str {
        match self {
            RequestKind::Url => "url-",
            RequestKind::Data => "data-",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::Url => "url",
            RequestKind::Data => "data",
        })
    }
}

/// Normalized request produced by the routing layer. The core never sees
/// raw wire formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub kind: RequestKind,
    pub value: String,
    /// Caller hint that the URL points at a video. When absent the URL
    /// path extension decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
}

impl ClassifyRequest {
    pub fn url(value: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Url,
            value: value.into(),
            video: None,
        }
    }

    pub fn data(value: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Data,
            value: value.into(),
            video: None,
        }
    }

    pub fn with_video_hint(mut self, video: bool) -> Self {
        self.video = Some(video);
        self
    }

    /// Fingerprint of the trimmed payload, the same text that is validated
    /// and fetched.
    pub fn fingerprint(&self) -> ContentFingerprint {
        ContentFingerprint::compute(self.kind, self.value.trim())
    }
}

/// Where acquired media lives while it moves through the pipeline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Bytes stay in memory between stages.
    #[default]
    Memory,
    /// Each stage reads and writes files under the work directory.
    File,
}

impl StorageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::Memory => "memory",
            StorageMode::File => "file",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "buffer" => Ok(StorageMode::Memory),
            "file" | "disk" => Ok(StorageMode::File),
            _ => Err(ModelError::UnknownVariant(raw.to_string())),
        }
    }
}

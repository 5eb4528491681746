//! Line-delimited JSON messages exchanged with worker processes. Byte
//! payloads travel as standard base64.

use std::{collections::BTreeMap, path::PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    Normalize {
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    NormalizeFile {
        input: PathBuf,
        output: PathBuf,
    },
    Score {
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    ScoreFile {
        path: PathBuf,
    },
}

impl WorkerRequest {
    pub fn op(&self) -> &'static str {
        match self {
            WorkerRequest::Normalize { .. } => "normalize",
            WorkerRequest::NormalizeFile { .. } => "normalize_file",
            WorkerRequest::Score { .. } => "score",
            WorkerRequest::ScoreFile { .. } => "score_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReply {
    Normalized {
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    Written {
        output: PathBuf,
        bytes: u64,
    },
    Scores {
        scores: BTreeMap<String, f32>,
    },
    Error {
        message: String,
    },
}

impl WorkerReply {
    pub fn error(message: impl Into<String>) -> Self {
        WorkerReply::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerReply::Normalized { .. } => "normalized",
            WorkerReply::Written { .. } => "written",
            WorkerReply::Scores { .. } => "scores",
            WorkerReply::Error { .. } => "error",
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

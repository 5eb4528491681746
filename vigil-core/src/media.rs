use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use vigil_model::Provenance;

/// Bytes of a classifiable image, held either in memory or in a file
/// owned by the request's scratch ledger.
#[derive(Debug, Clone)]
pub enum MediaHandle {
    Memory(Bytes),
    File(PathBuf),
}

impl MediaHandle {
    /// Load the content regardless of where it lives.
    pub async fn read(&self) -> io::Result<Bytes> {
        match self {
            MediaHandle::Memory(bytes) => Ok(bytes.clone()),
            MediaHandle::File(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            MediaHandle::Memory(_) => None,
            MediaHandle::File(path) => Some(path),
        }
    }
}

/// What [`MediaAcquirer`](crate::MediaAcquirer) hands back: one image and
/// how it was obtained.
#[derive(Debug, Clone)]
pub struct AcquiredMedia {
    pub media: MediaHandle,
    pub provenance: Provenance,
}

impl AcquiredMedia {
    pub fn new(media: MediaHandle, provenance: Provenance) -> Self {
        Self { media, provenance }
    }
}

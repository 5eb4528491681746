use std::fmt;

use serde::{Serialize, Serializer};

/// Which acquisition path produced the bytes that were classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Inline base64 payload, no network involved.
    Inline,
    /// Single bounded download of a non-video resource.
    Direct,
    /// Tier 1: frame extracted from a streamed response.
    StreamExtract,
    /// Tier 2: frame extracted from an in-memory partial download.
    BufferedRange,
    /// Tier 3: frame extracted from a partial download on disk.
    TempFile,
}

impl Provenance {
    pub fn tier(self) -> Option<u8> {
        match self {
            Provenance::StreamExtract => Some(1),
            Provenance::BufferedRange => Some(2),
            Provenance::TempFile => Some(3),
            Provenance::Inline | Provenance::Direct => None,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tier() {
            Some(tier) => write!(f, "tier {tier}"),
            None if *self == Provenance::Inline => f.write_str("inline"),
            None => f.write_str("direct"),
        }
    }
}

impl Serialize for Provenance {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether a result came from the cache or a fresh pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Cache,
    Fresh(Provenance),
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSource::Cache => f.write_str("cache"),
            ResultSource::Fresh(provenance) => provenance.fmt(f),
        }
    }
}

impl Serialize for ResultSource {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

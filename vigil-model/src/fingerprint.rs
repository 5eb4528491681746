use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::request::RequestKind;

/// SHA-256 identity of a request payload, namespaced by request kind so
/// that the same string submitted as a URL and as inline data never
/// collides.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint {
    kind: RequestKind,
    digest: [u8; 32],
}

impl ContentFingerprint {
    pub fn compute(kind: RequestKind, payload: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.namespace().as_bytes());
        hasher.update(payload.as_bytes());
        Self {
            kind,
            digest: hasher.finalize().into(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> String {
        format!("{}{}", self.kind.namespace(), hex::encode(&self.digest[..6]))
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.namespace(), hex::encode(self.digest))
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({})", self.short())
    }
}

impl Serialize for ContentFingerprint {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

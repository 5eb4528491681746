//! Data model shared across Vigil crates.
//!
//! Everything here is plain data: no I/O, no async. The core pipeline,
//! configuration loader and HTTP surface all speak these types.

pub mod error;
pub mod fingerprint;
pub mod provenance;
pub mod request;
pub mod scores;

pub use error::{ModelError, Result as ModelResult};
pub use fingerprint::ContentFingerprint;
pub use provenance::{Provenance, ResultSource};
pub use request::{ClassifyRequest, RequestKind, StorageMode};
pub use scores::{Category, CategoryScores, Probabilities};

//! Temp-file bookkeeping. Requests record every path they create in a
//! [`RequestScratch`]; the [`TempJanitor`] sweeps anything a crashed
//! process left behind.

mod janitor;
mod scratch;

pub use janitor::TempJanitor;
pub use scratch::{PurgeReport, RequestScratch};

/// File name prefix for everything Vigil writes into its work directory.
pub const TEMP_PREFIX: &str = "vigil-";

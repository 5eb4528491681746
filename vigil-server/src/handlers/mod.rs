pub mod classify;
pub mod health;

pub use classify::{classify_data, classify_url};
pub use health::health;

pub mod backoff;
pub mod config;
pub mod error;
pub mod telemetry;

pub use backoff::RetryPolicy;
pub use config::Config;
pub use error::{Error, Result};

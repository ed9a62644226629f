//! Shared tracing setup for the netwatch binaries.

mod error_log;
mod subscriber;

pub use error_log::{ErrorLogWriter, YearlyErrorLog};
pub use subscriber::{init, init_with_error_log};
pub use tracing_subscriber::filter::LevelFilter;

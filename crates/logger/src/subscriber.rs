use std::{env::var, path::PathBuf};

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

use crate::error_log::YearlyErrorLog;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the console subscriber only.
pub fn init(level: LevelFilter) -> Result<(), TryInitError> {
    initialize_tracing(level, None)
}

/// Install the console subscriber plus an ERROR-only layer appending to
/// `<dir>/errors-<year>.log`.
pub fn init_with_error_log(level: LevelFilter, dir: impl Into<PathBuf>) -> Result<(), TryInitError> {
    initialize_tracing(level, Some(dir.into()))
}

fn console_layer(level: LevelFilter) -> BoxedLayer {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT")
        .inspect_err(|error| {
            warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
        })
        .unwrap_or_default();

    match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    }
}

pub(crate) fn error_file_layer(dir: PathBuf) -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(YearlyErrorLog::new(dir))
        .with_filter(LevelFilter::ERROR)
        .boxed()
}

fn initialize_tracing(level: LevelFilter, error_dir: Option<PathBuf>) -> Result<(), TryInitError> {
    let mut layers = vec![console_layer(level)];
    if let Some(dir) = error_dir {
        layers.push(error_file_layer(dir));
    }

    tracing_subscriber::registry().with(layers).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use tempfile::tempdir;

    #[test]
    fn test_error_layer_only_keeps_errors() {
        let dir = tempdir().unwrap();
        let subscriber = tracing_subscriber::registry().with(error_file_layer(dir.path().into()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("cycle finished");
            tracing::error!("state persist failed");
        });

        let path = dir.path().join(format!("errors-{}.log", chrono::Local::now().year()));
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("state persist failed"));
        assert!(!contents.contains("cycle finished"));
    }
}

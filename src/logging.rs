use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Install the global tracing subscriber.
///
/// With a `log_file`, records are appended to it without ANSI colors. If the
/// file cannot be opened the subscriber falls back to stdout and says so.
/// A second call leaves the first subscriber in place.
pub fn init(log_file: Option<&Path>, verbose: bool) {
    let filter = default_filter(verbose);

    let file = log_file.map(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| (path.display().to_string(), e))
    });

    match file {
        Some(Ok(file)) => {
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
        }
        Some(Err((path, e))) => {
            init_stdout(filter);
            warn!(path = %path, error = %e, "Failed to open log file, logging to stdout");
        }
        None => init_stdout(filter),
    }
}

fn init_stdout(filter: EnvFilter) {
    let layer = fmt::layer().with_target(false).compact();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vigil.log");

        init(Some(&path), false);
        init(None, false);

        assert!(path.exists());
    }
}

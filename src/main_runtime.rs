use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use meetrelay::config::LoggingConfig;

fn default_filter(level: &str) -> String {
    if level.eq_ignore_ascii_case("info") {
        "info,meetrelay=debug,sqlx=warn".to_string()
    } else {
        format!("{},sqlx=warn", level)
    }
}

/// Daily rolling file layer, when the directory is writable.
///
/// `rolling::daily` panics if it cannot create the initial file, so
/// writability is checked first.
fn file_writer(dir: &str) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
        return None;
    }

    let probe = Path::new(dir).join(".meetrelay_write_test");
    if let Err(e) = std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
        eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
        return None;
    }
    let _ = std::fs::remove_file(&probe);

    let appender = tracing_appender::rolling::daily(dir, "meetrelay.log");
    Some(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber. The returned guard must live until exit.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.level)));

    let console_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let (file_layer, guard) = match config.dir.as_deref().and_then(file_writer) {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

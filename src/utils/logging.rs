use camino::Utf8Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,kamisama_loader=debug";

/// Installs the global subscriber: stdout plus a daily rolling file in
/// `log_dir`. Keep the returned guard alive for the lifetime of the app or
/// buffered file output is lost.
pub fn init(log_dir: &Utf8Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "kamisama.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer));

    if let Err(e) = registry.try_init() {
        eprintln!("logging already initialised: {e}");
    }

    tracing::info!("Kamisama loader logging to {log_dir}");
    guard
}

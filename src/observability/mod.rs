use crate::config::ObservabilityConfig;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parses a configured level name, falling back to `INFO`.
pub fn parse_level(raw: &str) -> Level {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the global fmt subscriber. Safe to call more than once; later calls are ignored.
pub fn init_tracing(config: &ObservabilityConfig) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log_level))
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

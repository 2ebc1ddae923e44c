use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter: everything at warn, this crate at `log_level`, and the per-request
/// middleware kept quiet unless asked for.
pub fn default_filter(log_level: &str) -> String {
    format!("warn,streamwatch={log_level},streamwatch::partner::middleware=warn")
}

/// Configure and initialize logging for the application.
///
/// `RUST_LOG`, when set, replaces the default filter.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    match tracing_format {
        TracingFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).compact())
                .init();
        }
        TracingFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(true)
                        .flatten_event(true),
                )
                .init();
        }
    }
}

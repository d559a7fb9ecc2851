use pmoconfig::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive used when `RUST_LOG` is not set.
fn default_directive(min_level: &str, verbose: bool) -> String {
    if verbose {
        return "debug".to_string();
    }
    match min_level.trim().to_ascii_lowercase().as_str() {
        level @ ("error" | "warn" | "info" | "debug" | "trace" | "off") => level.to_string(),
        "warning" => "warn".to_string(),
        _ => "info".to_string(),
    }
}

/// Installs the console subscriber.
///
/// `RUST_LOG` wins; otherwise `host.logger.min_level`, raised to `debug`
/// by `--verbose`.
pub fn init_logging(config: &Config, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directive(&config.get_log_min_level(), verbose))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
        .init();
}

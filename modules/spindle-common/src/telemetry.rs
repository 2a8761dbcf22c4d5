use tracing_subscriber::EnvFilter;

use crate::Config;

/// Initialize the tracing subscriber. `SPINDLE_LOG_LEVEL` sets the default
/// directive; `RUST_LOG` still wins when set. JSON output for log shippers,
/// plain text otherwise.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

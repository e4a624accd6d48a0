//! Logging and tracing initialization.

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber from [`LoggingConfig`].
///
/// `RUST_LOG` wins when set; otherwise the configured level is expanded
/// into a filter directive via [`default_directive`]. Repeated calls are
/// no-ops (the first subscriber stays installed).
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish()).ok();
    } else {
        tracing::subscriber::set_global_default(builder.finish()).ok();
    }
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}

/// Expand a bare level name ("debug") into a directive that keeps the
/// HTTP/websocket stack under the render-engine client quiet unless the
/// caller raises it explicitly. A level string that already contains
/// directives is passed through untouched.
fn default_directive(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    format!("{level},hyper=warn,reqwest=warn,tungstenite=warn")
}

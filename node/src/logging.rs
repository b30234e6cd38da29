//! Gateway logging.
//!
//! Events from the gateway, the lifecycle core and `tower_http` all go to
//! stderr: `simulate` owns stdout for its NDJSON event lines.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for `serve`: request traces plus lifecycle stage changes
/// at info.
pub const SERVE_DIRECTIVES: &str = "nova_gateway=info,nova_lifecycle=info,tower_http=debug";

/// Default filter for `simulate`. Lifecycle progress shows on stderr next
/// to the events on stdout; gateway chatter is muted.
pub const SIMULATE_DIRECTIVES: &str = "nova_gateway=warn,nova_lifecycle=info";

/// `--log-format` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over `directives`.
pub fn init_logging(directives: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_current_span(false))
            .init(),
    }

    tracing::debug!(?format, "gateway logging ready");
}

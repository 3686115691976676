use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Used when `RUST_LOG` is unset: the service itself at debug, dependencies
/// (hyper, tower) at info.
const DEFAULT_DIRECTIVES: &str = "info,cctv_fleet_server=debug";

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_telemetry() {
    tracing_subscriber::registry()
        .with(log_filter())
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    info!("📊 Logging ready (filter: {})", log_filter());
}

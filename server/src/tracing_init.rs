use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the process-wide `tracing` subscriber: JSON-formatted output on
/// stdout, level controlled by `RUST_LOG` (falling back to `level` when unset).
pub fn configure_tracer(default_level: &str) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("hub_server={default_level}")));

	fmt().json().with_env_filter(filter).with_target(true).init();
}

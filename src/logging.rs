use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` wins over the default level.
pub fn init(silent: bool) {
    let default = if silent { "error" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

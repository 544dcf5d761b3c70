use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` is only honored with `--debug`;
/// otherwise the level is pinned to `info` so console output stays readable.
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

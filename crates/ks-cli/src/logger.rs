use tracing_subscriber::EnvFilter;

/// Progress and warnings go to stderr so stdout stays clean for tables and JSON.
/// `RUST_LOG` overrides the level picked by `--verbose`.
pub fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `filter` takes the usual `RUST_LOG` directive syntax; a filter that does
/// not parse falls back to the crate defaults.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::cli::DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

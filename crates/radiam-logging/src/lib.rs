use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging at the configured level. `RUST_LOG`
/// overrides the level when set.
pub fn init(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .json()
        .init();
}

/// Initialize logging for tests (plain format, capture-friendly)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

use tracing_subscriber::EnvFilter;

/// Install the JSON log formatter used by every function.
///
/// Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_current_span(false)
        .init();
}

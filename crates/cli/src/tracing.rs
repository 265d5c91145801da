use tracing_subscriber::EnvFilter;

/// Stderr subscriber honouring `RUST_LOG`; quiet by default so REPL
/// output stays readable.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

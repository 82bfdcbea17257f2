use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber using the configured filter, with the
/// process environment taking precedence. Safe to call more than once.
pub fn init_tracing(service_name: &str, log_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));

    let _ = fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .compact()
        .try_init();

    tracing::info!(service = service_name, "tracing initialized");
}

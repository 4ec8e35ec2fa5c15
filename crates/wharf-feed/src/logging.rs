use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber for a feed host.
///
/// Honors `RUST_LOG` when set, otherwise logs the feed crates at info.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wharf=info,wharf_feed=info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

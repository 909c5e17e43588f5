use tracing_subscriber::{filter::Directive, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "telemetry_service=info";

pub fn init_tracing() {
    let directive: Directive = DEFAULT_DIRECTIVE
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

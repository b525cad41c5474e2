use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Which binary is initializing tracing, for the default filter directive.
#[derive(Clone, Copy, Debug)]
pub enum Backend {
    Auth,
    Orchestrator,
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Auth => "taskctl_auth",
            Backend::Orchestrator => "taskctl_orchestrator",
        }
    }
}

/// Installs a JSON-formatted, env-filtered tracing subscriber as the global
/// default. Mirrors `shuttle_common::backends::tracing::setup_tracing`,
/// minus the OpenTelemetry exporter (no collector to ship spans to here).
pub fn setup_tracing(backend: Backend) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info,warn", backend.name())));

    Registry::default()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .try_init()
        .ok();
}

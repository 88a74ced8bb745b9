//! Subscriber setup and the spans shared by the routing layer.
use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with the active span list attached
    Json,
    /// Multi-line human readable output for local runs
    Pretty,
}

/// Filter for `level`, unless `RUST_LOG` is set.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Install the global subscriber. Fails when `level` is not a valid filter
/// directive or a subscriber is already installed.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(level)?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!(level, ?format, "Logging initialized");
    Ok(())
}

/// Span wrapping a long-lived part of the process (`server`, `accept_loop`).
pub fn component_span(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Per-request span; status and duration are recorded once the response is final.
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Span covering the lazy resolution of a module identifier
pub fn create_resolve_span(identifier: &str) -> tracing::Span {
    tracing::info_span!(
        "module_resolve",
        module.identifier = identifier,
        duration_ms = tracing::field::Empty,
    )
}

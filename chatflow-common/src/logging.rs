//! Logging utilities for chatflow services.
//!
//! Provides structured JSON or pretty logging with trace IDs so every step a
//! conversation runs can be followed through the logs.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tokio_util)
//! are set to `warn` level to reduce log clutter while keeping business logs
//! at the specified level.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
];

/// Build the filter directives string with noise suppression.
fn build_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }
    directives
}

/// Build the default EnvFilter with noise suppression.
///
/// `RUST_LOG` wins when set.
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(build_directives(log_level))
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for one dispatched job.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a short ID, used for event IDs.
pub fn generate_span_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Create a tracing span for work done on behalf of one conversation.
///
/// # Example
///
/// ```ignore
/// let span = conversation_span!(conversation_id, trace_id, flow = %flow_id);
/// async move { /* run step */ }.instrument(span).await;
/// ```
#[macro_export]
macro_rules! conversation_span {
    ($conversation_id:expr, $trace_id:expr) => {
        tracing::info_span!(
            "conversation",
            conversation_id = %$conversation_id,
            trace_id = %$trace_id
        )
    };
    ($conversation_id:expr, $trace_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "conversation",
            conversation_id = %$conversation_id,
            trace_id = %$trace_id,
            $($field)*
        )
    };
}

/// Create a tracing span for external API calls.
#[macro_export]
macro_rules! api_call_span {
    ($service:expr, $($field:tt)*) => {
        tracing::info_span!("api_call", service = $service, $($field)*)
    };
}

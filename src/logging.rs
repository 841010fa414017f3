//! Logging for the plugin framework.
//!
//! The framework emits `tracing` events under the `hemmer_plugin_framework`
//! target. Every RPC runs inside a span named `rpc.<operation>`, and calls
//! into provider code are bracketed by "Calling provider defined ..." /
//! "Called provider defined ..." events at debug level. Structured fields use
//! the `KEY_*` names below so log processors can rely on them.
//!
//! The framework never installs a subscriber by itself. Provider binaries
//! call one of the initialisers here; all output goes to **stderr**, leaving
//! stdout to whatever transport hosts the provider.
//!
//! ```bash
//! # Framework debug output only
//! RUST_LOG=hemmer_plugin_framework=debug ./my-provider
//! ```

use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, registry::LookupSpan, EnvFilter, Layer};

/// Field holding the resource type name.
pub const KEY_RESOURCE_TYPE: &str = "resource_type";
/// Field holding the data source type name.
pub const KEY_DATA_SOURCE_TYPE: &str = "data_source_type";
/// Field holding the ephemeral resource type name.
pub const KEY_EPHEMERAL_RESOURCE_TYPE: &str = "ephemeral_resource_type";
/// Field holding the function name.
pub const KEY_FUNCTION_NAME: &str = "function_name";
/// Field holding the state store type name.
pub const KEY_STATE_STORE_TYPE: &str = "state_store_type";
/// Field holding an attribute path.
pub const KEY_ATTRIBUTE_PATH: &str = "attribute_path";
/// Field holding the reason of a deferred response.
pub const KEY_DEFERRED_REASON: &str = "deferred_reason";

fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the default logging subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level used when `RUST_LOG` is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning `false` if a subscriber was already set.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

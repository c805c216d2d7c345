//! Structured logging for planex.
//!
//! Log levels:
//! - ERROR: a run failed
//! - WARN: a task failed or a run continued with partial results
//! - INFO: run phases, dispatches and task completions
//! - DEBUG: worker, pool and provider traces
//!
//! Debug mode can be enabled with `--debug` flag or `PLANEX_DEBUG=1` env var.
//! `RUST_LOG` overrides both.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging at the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug_enabled)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var("PLANEX_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "planex=debug"
    } else {
        "planex=info"
    }
}

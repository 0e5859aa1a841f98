//! Structured logging helpers.
//!
//! Protocol code never installs a global subscriber itself — that is an
//! external collaborator's job (a CLI front-end, a test harness). This
//! module only provides a convenience initializer for binaries and tests
//! that want sensible defaults, plus the `tracing` targets protocol code
//! logs events against.

use tracing_subscriber::EnvFilter;

/// Target for packet send/receive events.
pub const TARGET_PACKET: &str = "rdt::packet";
/// Target for state machine transitions.
pub const TARGET_STATE: &str = "rdt::state";
/// Target for timer start/cancel/expiry events.
pub const TARGET_TIMER: &str = "rdt::timer";

/// Installs a `tracing_subscriber::fmt` subscriber reading filter
/// directives from `RDT_LOG` (falling back to `info`). Intended for use
/// by binaries, examples, and tests; calling this more than once is
/// harmless, since the second call's error is discarded.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("RDT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

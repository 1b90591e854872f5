//! Tracer error types

use nix::errno::Errno;
use thiserror::Error;

/// Fatal trace failures.
///
/// Per-child `/proc` harvesting problems are logged and never surface
/// here; only a broken wait loop or a child that cannot be configured for
/// tracing aborts the trace.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Could not attach to, configure, or resume a traced child.
    #[error("Trace setup failed for pid {pid}: {source}")]
    Setup { pid: i32, source: Errno },

    /// The kernel wait returned an unexpected error.
    #[error("Wait for traced children failed: {source}")]
    Wait { source: Errno },
}

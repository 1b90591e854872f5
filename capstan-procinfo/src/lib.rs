//! Per-job process-tree tracing for capstan workers
//!
//! When a worker launches a task, this crate follows the task's process and
//! every descendant it spawns, harvests `/proc`-derived I/O, memory, and
//! CPU statistics for each at its pre-exit stop, and renders them as
//! `<proc>` records for the task's invocation record.
//!
//! The traced child calls [`trace_me`] between fork and exec (from a
//! `pre_exec` hook); the parent then drives [`trace`]. Where kernel debug
//! tracing is unavailable, [`wait_for_main`] degrades to a plain wait with
//! no descendant records.

pub mod error;
mod procfs;
pub mod record;
pub mod tracer;

pub use error::TraceError;
pub use record::{write_proc_records, ProcInfo, ProcTable};
pub use tracer::{trace, trace_me, wait_for_main, TraceOutcome, WAIT_FAILED_STATUS};

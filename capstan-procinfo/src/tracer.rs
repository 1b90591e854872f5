//! Stop/continue event loop around the kernel debug-trace interface
//!
//! The traced child calls [`trace_me`] between fork and exec so the parent
//! becomes its tracer; the parent then drives [`trace`], which intercepts
//! every fork/vfork/clone/exit of the child and its descendants. Stats are
//! read from `/proc` at each process's pre-exit stop, the last moment the
//! kernel still exposes its accounting files.
//!
//! This scheme breaks jobs where a parent must observe a child stopping
//! (wait for SIGSTOP, then deliver SIGCONT): under ptrace those stops are
//! reported to the tracer instead of the parent. Batch workloads do not
//! depend on suspension, so stop signals are dropped rather than left to
//! deadlock the job.

use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use tracing::error;

#[cfg(target_os = "linux")]
use nix::sys::ptrace;
#[cfg(target_os = "linux")]
use nix::sys::signal::Signal;
#[cfg(target_os = "linux")]
use nix::unistd::Pid;
#[cfg(target_os = "linux")]
use tracing::debug;

use crate::error::TraceError;
#[cfg(target_os = "linux")]
use crate::procfs;
use crate::record::ProcTable;

/// Exit status recorded by [`wait_for_main`] when the wait itself fails.
pub const WAIT_FAILED_STATUS: i32 = -42;

/// What a finished trace hands back.
#[derive(Debug, Clone)]
pub struct TraceOutcome {
    /// Raw wait-style status word of the main child. When tracing, taken
    /// from the exit-event message, which also reports signal deaths
    /// correctly where the plain wait status does not.
    pub exit_status: i32,
    /// Kernel-reported resource usage of the main child.
    pub main_usage: libc::rusage,
    /// One record per traced pid, in first-seen order. Empty when only the
    /// fallback wait ran.
    pub procs: ProcTable,
}

fn empty_rusage() -> libc::rusage {
    // Plain C struct; all-zero is the empty value.
    unsafe { std::mem::zeroed() }
}

/// Wall clock in seconds since the epoch, microsecond resolution.
fn wallclock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Called by the child between fork and exec: request that the parent
/// trace this process and everything it subsequently spawns.
///
/// Returns an `io::Result` so it drops straight into
/// `std::os::unix::process::CommandExt::pre_exec`.
#[cfg(target_os = "linux")]
pub fn trace_me() -> std::io::Result<()> {
    ptrace::traceme().map_err(|err| std::io::Error::from_raw_os_error(err as i32))
}

#[cfg(not(target_os = "linux"))]
pub fn trace_me() -> std::io::Result<()> {
    Ok(())
}

/// Trace `main_pid` and every descendant until the whole tree has exited.
///
/// Returns the main child's exit status and usage plus one record per
/// observed pid. Wait and ptrace-configuration failures are fatal; `/proc`
/// harvesting failures are logged and leave the affected fields zero.
#[cfg(target_os = "linux")]
pub fn trace(main_pid: i32) -> Result<TraceOutcome, TraceError> {
    let mut procs = ProcTable::new();
    let mut exit_status = 0;
    let mut main_usage = empty_rusage();

    loop {
        let mut usage = empty_rusage();
        let (cpid, status) = match wait_any(&mut usage)? {
            Some(woke) => woke,
            // No children left: the tree is fully reaped.
            None => break,
        };

        if !procs.contains(cpid) {
            let rec = procs.insert(cpid);
            rec.start = wallclock();
            debug!(pid = cpid, "tracking new process");
            // Stop on fork/vfork/clone so descendants enter the table, and
            // on exit so stats can be read before /proc goes away.
            ptrace::setoptions(
                Pid::from_raw(cpid),
                ptrace::Options::PTRACE_O_TRACEEXIT
                    | ptrace::Options::PTRACE_O_TRACEFORK
                    | ptrace::Options::PTRACE_O_TRACEVFORK
                    | ptrace::Options::PTRACE_O_TRACECLONE,
            )
            .map_err(|source| {
                error!(pid = cpid, %source, "ptrace setoptions failed");
                TraceError::Setup { pid: cpid, source }
            })?;
        }

        if libc::WIFEXITED(status) && cpid == main_pid {
            // Descendant exits carry nothing to collect: their stats were
            // already harvested at the pre-exit stop.
            main_usage = usage;
        }

        if libc::WIFSTOPPED(status) {
            let signal = libc::WSTOPSIG(status);
            if signal == Signal::SIGTRAP as i32 {
                // A trace event. Only the pre-exit stop carries work; the
                // fork/vfork/clone announcements just resume.
                if status >> 16 == libc::PTRACE_EVENT_EXIT {
                    debug!(pid = cpid, "pre-exit stop, harvesting stats");
                    if let Some(rec) = procs.get_mut(cpid) {
                        rec.stop = wallclock();
                        procfs::harvest(rec);
                    }
                    if cpid == main_pid {
                        // The plain wait status misreports signal deaths;
                        // the exit-event message carries the real one.
                        let event = ptrace::getevent(Pid::from_raw(cpid)).map_err(|source| {
                            error!(pid = cpid, %source, "ptrace getevent failed");
                            TraceError::Setup { pid: cpid, source }
                        })?;
                        exit_status = event as i32;
                    }
                }
                resume(cpid, None)?;
            } else if signal == Signal::SIGSTOP as i32 || signal == Signal::SIGTSTP as i32 {
                // The nominal parent never observes this stop under ptrace,
                // so its SIGCONT never comes; deliver nothing instead.
                debug!(pid = cpid, signal, "dropping stop signal");
                resume(cpid, None)?;
            } else {
                debug!(pid = cpid, signal, "forwarding signal");
                resume(cpid, Signal::try_from(signal).ok())?;
            }
        }
    }

    Ok(TraceOutcome {
        exit_status,
        main_usage,
        procs,
    })
}

/// Without kernel debug tracing, `trace` degrades to the plain wait.
#[cfg(not(target_os = "linux"))]
pub fn trace(main_pid: i32) -> Result<TraceOutcome, TraceError> {
    Ok(wait_for_main(main_pid))
}

#[cfg(target_os = "linux")]
fn resume(pid: i32, signal: Option<Signal>) -> Result<(), TraceError> {
    ptrace::cont(Pid::from_raw(pid), signal).map_err(|source| {
        error!(pid, %source, "ptrace cont failed");
        TraceError::Setup { pid, source }
    })
}

/// Wait for any traced child, threads included. `Ok(None)` means no
/// children remain.
#[cfg(target_os = "linux")]
fn wait_any(usage: &mut libc::rusage) -> Result<Option<(i32, i32)>, TraceError> {
    loop {
        let mut status = 0;
        let pid = unsafe { libc::wait4(-1, &mut status, libc::__WALL, usage) };
        if pid >= 0 {
            return Ok(Some((pid, status)));
        }
        match Errno::last() {
            Errno::ECHILD => return Ok(None),
            Errno::EINTR => continue,
            source => {
                error!(%source, "wait4 failed");
                return Err(TraceError::Wait { source });
            }
        }
    }
}

/// Fallback for when debug tracing is unavailable: wait for the main child
/// only, retrying on interruption. No descendant records are produced; a
/// failed wait records [`WAIT_FAILED_STATUS`].
pub fn wait_for_main(main_pid: i32) -> TraceOutcome {
    let mut status = 0;
    let mut usage = empty_rusage();
    loop {
        let rc = unsafe { libc::wait4(main_pid, &mut status, 0, &mut usage) };
        if rc >= 0 {
            break;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            source => {
                error!(%source, pid = main_pid, "wait4 failed");
                status = WAIT_FAILED_STATUS;
                break;
            }
        }
    }
    TraceOutcome {
        exit_status: status,
        main_usage: usage,
        procs: ProcTable::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallclock_advances() {
        let a = wallclock();
        let b = wallclock();
        assert!(a > 1.0e9); // later than 2001
        assert!(b >= a);
    }

    #[test]
    fn empty_rusage_is_zeroed() {
        let usage = empty_rusage();
        assert_eq!(usage.ru_utime.tv_sec, 0);
        assert_eq!(usage.ru_maxrss, 0);
    }
}

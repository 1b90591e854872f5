//! `/proc` harvesters for traced children
//!
//! All readers are tolerant. A missing file means the kernel is too old or
//! the process raced away; the affected fields stay zero. A file that is
//! present but unparseable is logged and likewise leaves fields zero.

use std::fs;
use std::io;

use tracing::warn;

use crate::record::ProcInfo;

/// Fill `rec` from `/proc/<pid>/{exe,status,stat,io}`.
///
/// Failures are logged at `warn!`; none of them aborts the trace.
pub(crate) fn harvest(rec: &mut ProcInfo) {
    if let Err(err) = read_exe(rec) {
        warn!(pid = rec.pid, %err, "reading /proc exe link failed");
    }
    if let Err(err) = read_status(rec) {
        warn!(pid = rec.pid, %err, "reading /proc status failed");
    }
    if let Err(err) = read_stat(rec) {
        warn!(pid = rec.pid, %err, "reading /proc stat failed");
    }
    if let Err(err) = read_io(rec) {
        warn!(pid = rec.pid, %err, "reading /proc io failed");
    }
}

/// Read a `/proc` file whose absence is expected on some kernels.
fn read_optional(path: String) -> io::Result<Option<String>> {
    match fs::read_to_string(&path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn read_exe(rec: &mut ProcInfo) -> io::Result<()> {
    rec.exe = fs::read_link(format!("/proc/{}/exe", rec.pid))?;
    Ok(())
}

fn read_status(rec: &mut ProcInfo) -> io::Result<()> {
    if let Some(content) = read_optional(format!("/proc/{}/status", rec.pid))? {
        parse_status(&content, rec);
    }
    Ok(())
}

/// Recognized `status` lines: `PPid:`, `Tgid:`, `VmPeak:`, `VmHWM:`.
/// Everything else is ignored.
fn parse_status(content: &str, rec: &mut ProcInfo) {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("PPid:") {
            match rest.trim().parse() {
                Ok(v) => rec.ppid = v,
                Err(_) => warn!(pid = rec.pid, line, "unparseable status line"),
            }
        } else if let Some(rest) = line.strip_prefix("Tgid:") {
            match rest.trim().parse() {
                Ok(v) => rec.tgid = v,
                Err(_) => warn!(pid = rec.pid, line, "unparseable status line"),
            }
        } else if let Some(rest) = line.strip_prefix("VmPeak:") {
            match parse_kb(rest) {
                Some(v) => rec.vmpeak = v,
                None => warn!(pid = rec.pid, line, "unparseable status line"),
            }
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            match parse_kb(rest) {
                Some(v) => rec.rsspeak = v,
                None => warn!(pid = rec.pid, line, "unparseable status line"),
            }
        }
    }
}

/// `"  123456 kB"` -> `123456`.
fn parse_kb(rest: &str) -> Option<i64> {
    rest.split_whitespace().next()?.parse().ok()
}

fn read_stat(rec: &mut ProcInfo) -> io::Result<()> {
    if let Some(content) = read_optional(format!("/proc/{}/stat", rec.pid))? {
        match parse_stat_cpu(&content) {
            Some((utime_ticks, stime_ticks)) => {
                let ticks = clock_ticks_per_sec();
                rec.utime = utime_ticks as f64 / ticks;
                rec.stime = stime_ticks as f64 / ticks;
            }
            None => warn!(pid = rec.pid, "unparseable stat file"),
        }
    }
    Ok(())
}

/// Fields 14 and 15 of `stat` are utime and stime in clock ticks. The
/// command field can itself contain spaces and parentheses, so fields are
/// counted from its closing paren, not from the front.
fn parse_stat_cpu(content: &str) -> Option<(u64, u64)> {
    let after_comm = &content[content.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace().skip(11);
    let utime = fields.next()?.parse().ok()?;
    let stime = fields.next()?.parse().ok()?;
    Some((utime, stime))
}

fn clock_ticks_per_sec() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

fn read_io(rec: &mut ProcInfo) -> io::Result<()> {
    // Added in Linux 2.6.20 and absent without task IO accounting.
    if let Some(content) = read_optional(format!("/proc/{}/io", rec.pid))? {
        parse_io(&content, rec);
    }
    Ok(())
}

fn parse_io(content: &str, rec: &mut ProcInfo) {
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "rchar" => &mut rec.rchar,
            "wchar" => &mut rec.wchar,
            "syscr" => &mut rec.syscr,
            "syscw" => &mut rec.syscw,
            "read_bytes" => &mut rec.read_bytes,
            "write_bytes" => &mut rec.write_bytes,
            "cancelled_write_bytes" => &mut rec.cancelled_write_bytes,
            _ => continue,
        };
        match value.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!(pid = rec.pid, line, "unparseable io line"),
        }
    }
}

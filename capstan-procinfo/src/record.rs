//! Per-process resource records and the `<proc>` emitter

use std::io::{self, Write};
use std::path::PathBuf;

/// Resource usage for one traced process, filled from `/proc` at its
/// pre-exit stop.
///
/// Every numeric field defaults to zero and stays zero when the matching
/// `/proc` file is missing (older kernels, or the process raced away).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcInfo {
    pub pid: i32,
    pub ppid: i32,
    /// Thread-group id. Differs from `pid` for non-leader threads, which
    /// are tracked but suppressed in output.
    pub tgid: i32,
    /// Resolved target of `/proc/<pid>/exe`. Empty if unreadable.
    pub exe: PathBuf,
    /// Wall clock, seconds since the epoch, stamped once when first seen.
    pub start: f64,
    /// Wall clock at the pre-exit stop. Zero if the exit was never caught.
    pub stop: f64,
    /// User-mode CPU seconds.
    pub utime: f64,
    /// Kernel-mode CPU seconds.
    pub stime: f64,
    /// Peak virtual memory size, kB.
    pub vmpeak: i64,
    /// Peak resident set size, kB.
    pub rsspeak: i64,
    pub rchar: u64,
    pub wchar: u64,
    pub syscr: u64,
    pub syscw: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub cancelled_write_bytes: u64,
}

impl ProcInfo {
    pub(crate) fn new(pid: i32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }
}

/// Insertion-ordered store of [`ProcInfo`] records, keyed uniquely by pid.
#[derive(Debug, Clone, Default)]
pub struct ProcTable {
    entries: Vec<ProcInfo>,
}

impl ProcTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.entries.iter().any(|p| p.pid == pid)
    }

    pub fn get(&self, pid: i32) -> Option<&ProcInfo> {
        self.entries.iter().find(|p| p.pid == pid)
    }

    pub fn get_mut(&mut self, pid: i32) -> Option<&mut ProcInfo> {
        self.entries.iter_mut().find(|p| p.pid == pid)
    }

    /// Append a fresh record for `pid`. Callers check [`ProcTable::contains`]
    /// first; pids are unique within a table.
    pub(crate) fn insert(&mut self, pid: i32) -> &mut ProcInfo {
        self.entries.push(ProcInfo::new(pid));
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Records in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write one `<proc .../>` element per main-thread record, in first-seen
/// order, each line indented by `indent` spaces.
///
/// Records with `tgid != pid` are non-leader threads of multithreaded
/// processes and are skipped. Attribute order is part of the record
/// contract consumed downstream.
pub fn write_proc_records<W: Write>(out: &mut W, indent: usize, table: &ProcTable) -> io::Result<()> {
    let pad = " ".repeat(indent);
    for rec in table.iter().filter(|r| r.tgid == r.pid) {
        writeln!(
            out,
            "{pad}<proc ppid=\"{}\" pid=\"{}\" exe=\"{}\" start=\"{}\" stop=\"{}\" \
             utime=\"{:.2}\" stime=\"{:.2}\" vmpeak=\"{}\" rsspeak=\"{}\" \
             rchar=\"{}\" wchar=\"{}\" rbytes=\"{}\" wbytes=\"{}\" cwbytes=\"{}\" \
             syscr=\"{}\" syscw=\"{}\"/>",
            rec.ppid,
            rec.pid,
            rec.exe.display(),
            rec.start,
            rec.stop,
            rec.utime,
            rec.stime,
            rec.vmpeak,
            rec.rsspeak,
            rec.rchar,
            rec.wchar,
            rec.read_bytes,
            rec.write_bytes,
            rec.cancelled_write_bytes,
            rec.syscr,
            rec.syscw,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(indent: usize, table: &ProcTable) -> String {
        let mut buf = Vec::new();
        write_proc_records(&mut buf, indent, table).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn table_keeps_first_seen_order() {
        let mut table = ProcTable::new();
        table.insert(30);
        table.insert(10);
        table.insert(20);
        let pids: Vec<i32> = table.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![30, 10, 20]);
    }

    #[test]
    fn lookup_by_pid() {
        let mut table = ProcTable::new();
        table.insert(5).start = 1.0;
        assert!(table.contains(5));
        assert!(!table.contains(6));
        assert_eq!(table.get(5).map(|p| p.start), Some(1.0));
        table.get_mut(5).unwrap().stop = 2.0;
        assert_eq!(table.get(5).map(|p| p.stop), Some(2.0));
    }

    #[test]
    fn emits_attributes_in_contract_order() {
        let mut table = ProcTable::new();
        let rec = table.insert(101);
        rec.ppid = 100;
        rec.tgid = 101;
        rec.exe = PathBuf::from("/bin/true");
        rec.start = 100.5;
        rec.stop = 101.25;
        rec.utime = 0.125;
        rec.stime = 1.0;
        rec.vmpeak = 2048;
        rec.rsspeak = 512;
        rec.rchar = 10;
        rec.wchar = 20;
        rec.syscr = 3;
        rec.syscw = 4;
        rec.read_bytes = 4096;
        rec.write_bytes = 8192;
        rec.cancelled_write_bytes = 1;

        assert_eq!(
            emitted(0, &table),
            "<proc ppid=\"100\" pid=\"101\" exe=\"/bin/true\" start=\"100.5\" stop=\"101.25\" \
             utime=\"0.12\" stime=\"1.00\" vmpeak=\"2048\" rsspeak=\"512\" \
             rchar=\"10\" wchar=\"20\" rbytes=\"4096\" wbytes=\"8192\" cwbytes=\"1\" \
             syscr=\"3\" syscw=\"4\"/>\n"
        );
    }

    #[test]
    fn suppresses_non_leader_threads() {
        let mut table = ProcTable::new();
        let leader = table.insert(200);
        leader.tgid = 200;
        let thread = table.insert(201);
        thread.tgid = 200;

        let text = emitted(0, &table);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("pid=\"200\""));
        assert!(!text.contains("pid=\"201\""));
    }

    #[test]
    fn emits_in_first_seen_order_with_indent() {
        let mut table = ProcTable::new();
        table.insert(3).tgid = 3;
        table.insert(1).tgid = 1;

        let text = emitted(4, &table);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("    <proc "));
        assert!(lines[0].contains("pid=\"3\""));
        assert!(lines[1].contains("pid=\"1\""));
    }

    #[test]
    fn emitted_pids_are_distinct() {
        let mut table = ProcTable::new();
        for pid in [7, 8, 9] {
            table.insert(pid).tgid = pid;
        }
        let text = emitted(0, &table);
        let mut pids: Vec<&str> = text
            .lines()
            .filter_map(|l| l.split(" pid=\"").nth(1))
            .filter_map(|rest| rest.split('"').next())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), 3);
    }
}

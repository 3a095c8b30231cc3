//! The read-only `/proc` projection (component C).
//!
//! Entry kinds are a closed set by design: a static leaf with a `show`
//! generator, a static directory with a fixed child list, a symlink with a
//! `readlink` generator, or the dynamic per-pid directory synthesized by
//! [`ProcRoot::readdir`] and resolved by [`ProcRoot::lookup_pid`].

use std::{fmt::Write as _, sync::Arc};

use crate::{
    collab::{CpuInfo, Telemetry, Vfs},
    config::LOAD_FIXED_POINT_SCALE,
    task::{Task, TaskStat, TaskTable},
};

/// A node in the proc tree. The set of kinds is closed; do not add an
/// `other(Box<dyn Trait>)` variant here — dynamic dispatch would let any
/// caller invent new proc-entry shapes instead of going through the
/// handful this module actually renders.
pub enum ProcNode {
    /// A leaf file whose contents are regenerated on every read.
    StaticLeaf { name: &'static str, show: fn(&ProcRoot) -> String },
    /// A directory with a fixed, statically known child list.
    StaticDir { name: &'static str, children: &'static [&'static str] },
    /// A symlink whose target is computed per read.
    Symlink { name: &'static str, target: fn(&ProcRoot, u32) -> String },
    /// The root's per-pid subtree; matched by parsing the path segment as
    /// a pid rather than listed in [`ROOT_ENTRIES`].
    DynamicPidDir,
}

/// The single instance of [`ProcNode::DynamicPidDir`], returned by
/// [`ProcRoot::lookup_pid`] for any pid that resolves.
static PID_DIR_NODE: ProcNode = ProcNode::DynamicPidDir;

/// Files synthesized under every `/proc/<pid>/` directory, in `readdir`
/// order.
const PID_DIR_CHILDREN: &[&str] = &["cmdline", "fd", "maps", "stat", "status"];

/// Static root entries, alphabetically ordered — guest tools that assume
/// `readdir` order matches `ls` would otherwise see a different listing
/// every run.
const ROOT_ENTRIES: &[ProcNode] = &[
    ProcNode::StaticLeaf { name: "cpuinfo", show: show_cpuinfo },
    ProcNode::StaticLeaf { name: "diskstats", show: show_diskstats },
    ProcNode::StaticLeaf { name: "filesystems", show: show_filesystems },
    ProcNode::StaticDir { name: "ish", children: &[] },
    ProcNode::StaticLeaf { name: "loadavg", show: show_loadavg },
    ProcNode::StaticLeaf { name: "meminfo", show: show_meminfo },
    ProcNode::StaticLeaf { name: "mounts", show: show_mounts },
    ProcNode::StaticDir { name: "net", children: &[] },
    ProcNode::Symlink { name: "self", target: self_target },
    ProcNode::StaticLeaf { name: "stat", show: show_stat },
    ProcNode::StaticDir { name: "sys", children: &[] },
    ProcNode::StaticLeaf { name: "uptime", show: show_uptime },
    ProcNode::StaticLeaf { name: "version", show: show_version },
    ProcNode::StaticLeaf { name: "vmstat", show: show_vmstat },
];

/// An opaque `readdir` cursor. `0..ROOT_ENTRIES.len()` indexes
/// [`ROOT_ENTRIES`] directly; beyond that, `index - ROOT_ENTRIES.len()`
/// is "last pid seen".
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReaddirCursor(pub u64);

/// One entry returned by [`ProcRoot::readdir`].
pub enum ReaddirEntry {
    Static(&'static str),
    Pid(u32),
}

/// The root of the proc tree: holds the collaborator handles every
/// `show`/`readlink` function needs, plus the task table it enumerates.
pub struct ProcRoot {
    pub tasks: Arc<TaskTable>,
    pub cpu: Arc<dyn CpuInfo>,
    pub telemetry: Arc<dyn Telemetry>,
    pub vfs: Arc<dyn Vfs>,
    /// Pid the caller's `/proc/self` should resolve to. The real VFS
    /// layer supplies "the pid of whoever opened this file"; tests and
    /// the demo binary set it directly.
    pub current_pid: u32,
}

impl ProcRoot {
    pub fn new(
        tasks: Arc<TaskTable>,
        cpu: Arc<dyn CpuInfo>,
        telemetry: Arc<dyn Telemetry>,
        vfs: Arc<dyn Vfs>,
        current_pid: u32,
    ) -> Self {
        Self { tasks, cpu, telemetry, vfs, current_pid }
    }

    /// Finds the static root entry named `name`, if any.
    pub fn lookup_static(&self, name: &str) -> Option<&'static ProcNode> {
        ROOT_ENTRIES.iter().find(|n| match n {
            ProcNode::StaticLeaf { name: n, .. }
            | ProcNode::StaticDir { name: n, .. }
            | ProcNode::Symlink { name: n, .. } => *n == name,
            ProcNode::DynamicPidDir => false,
        })
    }

    /// Resolves `pid` to the per-pid directory node, if a task record
    /// (alive or zombie) exists for it.
    pub fn lookup_pid(&self, pid: u32) -> Option<&'static ProcNode> {
        self.tasks
            .pid_get_task_including_zombies(pid)
            .map(|_| &PID_DIR_NODE)
    }

    /// The fixed child list of every per-pid directory.
    pub fn pid_dir_children(&self) -> &'static [&'static str] {
        PID_DIR_CHILDREN
    }

    /// Renders one file under `/proc/<pid>/`, or `None` if `pid` doesn't
    /// resolve or `name` isn't one of [`Self::pid_dir_children`].
    pub fn show_pid_file(&self, pid: u32, name: &str) -> Option<String> {
        let task = self.tasks.pid_get_task_including_zombies(pid)?;
        match name {
            "stat" => Some(TaskStat::from_task(&task).to_string()),
            "status" => Some(show_pid_status(&task)),
            "cmdline" => Some(show_pid_cmdline(&task)),
            "maps" => Some(String::new()),
            "fd" => None,
            _ => None,
        }
    }

    /// Renders the text of a static leaf.
    pub fn show(&self, node: &ProcNode) -> Option<String> {
        match node {
            ProcNode::StaticLeaf { show, .. } => Some(show(self)),
            _ => None,
        }
    }

    /// Resolves a symlink's target text.
    pub fn readlink(&self, node: &ProcNode) -> Option<String> {
        match node {
            ProcNode::Symlink { target, .. } => Some(target(self, self.current_pid)),
            _ => None,
        }
    }

    /// `readdir` at `cursor`: static entries first, then a forward scan of
    /// the alive-pid list.
    pub fn readdir(&self, cursor: ReaddirCursor) -> Option<(ReaddirEntry, ReaddirCursor)> {
        let static_len = ROOT_ENTRIES.len() as u64;
        if cursor.0 < static_len {
            let entry = match &ROOT_ENTRIES[cursor.0 as usize] {
                ProcNode::StaticLeaf { name, .. }
                | ProcNode::StaticDir { name, .. }
                | ProcNode::Symlink { name, .. } => *name,
                ProcNode::DynamicPidDir => unreachable!("not a root entry"),
            };
            return Some((ReaddirEntry::Static(entry), ReaddirCursor(cursor.0 + 1)));
        }

        let last_seen = (cursor.0 - static_len) as u32;
        let next = self.tasks.next_alive_pid_after(last_seen)?;
        Some((ReaddirEntry::Pid(next), ReaddirCursor(static_len + next as u64)))
    }
}

fn self_target(_root: &ProcRoot, current_pid: u32) -> String {
    format!("{current_pid}/")
}

/// Mnemonic per EDX bit of CPUID leaf 1. Reserved bits spell `"Reserved"`
/// literally except bit 16, which maps to the empty string.
const EDX_FLAG_NAMES: [&str; 32] = [
    "fpu", "vme", "de", "pse", "tsc", "msr", "pae", "mce", "cx8", "apic", "Reserved",
    "sep", "mtrr", "pge", "mca", "cmov", "", "pse-36", "psn", "clfsh", "Reserved",
    "ds", "acpi", "mmx", "fxsr", "sse", "sse2", "ss", "htt", "tm", "Reserved", "pbe",
];

fn edx_flags(edx: u32) -> String {
    let mut out = String::new();
    for (bit, name) in EDX_FLAG_NAMES.iter().enumerate() {
        if edx & (1 << bit) != 0 {
            out.push_str(name);
            out.push(' ');
        }
    }
    out
}

fn vendor_id_string(ebx: u32, ecx: u32, edx: u32) -> String {
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&ebx.to_le_bytes());
    bytes[4..8].copy_from_slice(&edx.to_le_bytes());
    bytes[8..12].copy_from_slice(&ecx.to_le_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

fn show_cpuinfo(root: &ProcRoot) -> String {
    let (_, ebx, ecx, edx) = root.cpu.cpuid(0);
    let vendor_id = vendor_id_string(ebx, ecx, edx);
    let (_, clflush_ebx, _, edx1) = root.cpu.cpuid(1);
    let flags = edx_flags(edx1);
    let cpu_count = root.telemetry.cpu_count();

    let mut out = String::new();
    for i in 0..cpu_count {
        let _ = writeln!(out, "processor       : {i}");
        let _ = writeln!(out, "vendor_id       : {vendor_id}");
        let _ = writeln!(out, "cpu family      : 1");
        let _ = writeln!(out, "model           : 1");
        let _ = writeln!(out, "model name      : vkernel Virtual i686-compatible CPU @ 1.066GHz");
        let _ = writeln!(out, "stepping        : 1");
        let _ = writeln!(out, "CPU MHz         : 1066.00");
        let _ = writeln!(out, "cache size      : 0 kb");
        // Intentional typo, preserved for bug compatibility: guest `top`/`ps`
        // builds parse this literal header.
        let _ = writeln!(out, "pysical id      : 0");
        let _ = writeln!(out, "siblings        : 0");
        let _ = writeln!(out, "core id         : 0");
        let _ = writeln!(out, "cpu cores       : {cpu_count}");
        let _ = writeln!(out, "apicid          : 0");
        let _ = writeln!(out, "initial apicid  : 0");
        let _ = writeln!(out, "fpu             : yes");
        let _ = writeln!(out, "fpu_exception   : yes");
        let _ = writeln!(out, "cpuid level     : 13");
        let _ = writeln!(out, "wp              : yes");
        let _ = writeln!(out, "flags           : {flags}");
        let _ = writeln!(out, "bogomips        : 1066.00");
        let _ = writeln!(out, "clflush size    : {clflush_ebx}");
        let _ = writeln!(out, "cache_alignment : 64");
        let _ = writeln!(out, "address sizes   : 36 bits physical, 32 bits virtual");
        let _ = writeln!(out, "power management:");
        out.push('\n');
    }
    out
}

fn show_stat(root: &ProcRoot) -> String {
    let total = root.telemetry.total_cpu_usage();
    let uptime = root.telemetry.uptime();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "cpu  {} {} {} {} 0 0 0 0",
        total.user_ticks, total.nice_ticks, total.system_ticks, total.idle_ticks
    );
    if let Some(per_cpu) = root.telemetry.per_cpu_usage() {
        for (i, usage) in per_cpu.iter().enumerate() {
            let _ = writeln!(
                out,
                "cpu{i}  {} {} {} {} 0 0 0 0",
                usage.user_ticks, usage.nice_ticks, usage.system_ticks, usage.idle_ticks
            );
        }
    }
    let blocked = root.tasks.count_blocked();
    let alive = root.tasks.count_alive();
    let _ = writeln!(out, "ctxt 0");
    let _ = writeln!(out, "btime {}", uptime.uptime_ticks);
    let _ = writeln!(out, "processes {alive}");
    let _ = writeln!(out, "procs_running {}", alive.saturating_sub(blocked));
    let _ = writeln!(out, "procs_blocked {blocked}");
    out
}

fn show_kb(out: &mut String, name: &str, value_bytes: u64) {
    let _ = writeln!(out, "{name}{:>8} kB", value_bytes / 1000);
}

fn show_meminfo(root: &ProcRoot) -> String {
    let usage = root.telemetry.mem_usage();
    let mut out = String::new();
    show_kb(&mut out, "MemTotal:       ", usage.total);
    show_kb(&mut out, "MemFree:        ", usage.free);
    show_kb(&mut out, "MemAvailable:   ", usage.available);
    show_kb(&mut out, "MemShared:      ", usage.free);
    show_kb(&mut out, "Active:         ", usage.active);
    show_kb(&mut out, "Inactive:       ", usage.inactive);
    show_kb(&mut out, "SwapCached:     ", 0);
    show_kb(&mut out, "Shmem:          ", 0);
    show_kb(&mut out, "Buffers:        ", 0);
    show_kb(&mut out, "Cached:         ", usage.cached);
    show_kb(&mut out, "SwapTotal:      ", 0);
    show_kb(&mut out, "SwapFree:       ", 0);
    show_kb(&mut out, "Dirty:          ", 0);
    show_kb(&mut out, "Writeback:      ", 0);
    show_kb(&mut out, "AnonPages:      ", 0);
    show_kb(&mut out, "Mapped:         ", 0);
    show_kb(&mut out, "Slab:           ", 0);
    show_kb(&mut out, "Swapins:        ", usage.swapins);
    show_kb(&mut out, "Swapouts:       ", usage.swapouts);
    show_kb(&mut out, "WireCount:      ", usage.wirecount);
    out
}

fn show_uptime(root: &ProcRoot) -> String {
    let ticks = root.telemetry.uptime().uptime_ticks;
    format!("{}.{:02} {}.{:02}\n", ticks / 100, ticks % 100, ticks / 100, ticks % 100)
}

fn show_vmstat(_root: &ProcRoot) -> String {
    String::new()
}

fn show_diskstats(_root: &ProcRoot) -> String {
    "8       0 disk1 1 0 0 0 0 0 0 0 0 0 0 0 0 0\n".to_owned()
}

fn show_filesystems(root: &ProcRoot) -> String {
    root.vfs.filesystems()
}

fn show_version(root: &ProcRoot) -> String {
    let uts = root.cpu.uname();
    format!("{} version {} {}\n", uts.sysname, uts.release, uts.version)
}

fn escape_mount_field(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b'\t' | b' ' | b'\\' => {
                let _ = write!(out, "\\{:03o}", b);
            }
            _ => out.push(b as char),
        }
    }
    out
}

fn show_mounts(root: &ProcRoot) -> String {
    let mut out = String::new();
    for mount in root.vfs.mounts() {
        let point = if mount.point.is_empty() { "/" } else { &mount.point };
        let _ = write!(out, "{} {} {} ", escape_mount_field(&mount.source), escape_mount_field(point), mount.fstype);
        let mut opts = Vec::new();
        opts.push(if mount.read_only { "ro" } else { "rw" });
        if mount.no_suid {
            opts.push("nosuid");
        }
        if mount.no_dev {
            opts.push("nodev");
        }
        if mount.no_exec {
            opts.push("noexec");
        }
        if !mount.info.is_empty() {
            opts.push(&mount.info);
        }
        let _ = writeln!(out, "{} 0 0", opts.join(","));
    }
    out
}

fn show_loadavg(root: &ProcRoot) -> String {
    let uptime = root.telemetry.uptime();
    let last_pid = root.tasks.last_allocated_pid();
    let load_1m = uptime.load_1m as f64 / LOAD_FIXED_POINT_SCALE as f64;
    let load_5m = uptime.load_5m as f64 / LOAD_FIXED_POINT_SCALE as f64;
    let load_15m = uptime.load_15m as f64 / LOAD_FIXED_POINT_SCALE as f64;
    let blocked = root.tasks.count_blocked();
    let alive = root.tasks.count_alive();
    let running = root.telemetry.cpu_count().min(alive.saturating_sub(blocked));
    format!("{load_1m:.2} {load_5m:.2} {load_15m:.2} {running}/{alive} {last_pid}\n")
}

fn task_state_name(state: char) -> &'static str {
    match state {
        'R' => "R (running)",
        'D' => "D (uninterruptible sleep)",
        'Z' => "Z (zombie)",
        _ => "? (unknown)",
    }
}

fn show_pid_status(task: &Task) -> String {
    let stat = TaskStat::from_task(task);
    let mut out = String::new();
    let _ = writeln!(out, "Name:\t{}", stat.comm);
    let _ = writeln!(out, "State:\t{}", task_state_name(stat.state));
    let _ = writeln!(out, "Tgid:\t{}", task.tgid);
    let _ = writeln!(out, "Pid:\t{}", task.pid);
    let _ = writeln!(out, "PPid:\t{}", stat.ppid);
    let _ = writeln!(out, "Threads:\t{}", task.thread_group.member_count());
    out
}

fn show_pid_cmdline(task: &Task) -> String {
    format!("{}\0", task.comm.lock().unwrap())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        collab::{CpuUsage, MemUsage, MountEntry, UptimeInfo},
        mm::MemorySpace,
        task::{CreateOpts, TaskTable},
    };

    struct FixedCpu;
    impl CpuInfo for FixedCpu {
        fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32) {
            match leaf {
                0 => (0, 0x756e6547, 0x6c65746e, 0x49656e69), // "GenuineIntel"
                _ => (0, 0, 0, 1 << 0),
            }
        }
        fn uname(&self) -> crate::collab::UtsName {
            crate::collab::UtsName {
                sysname: "vkernel".into(),
                release: "1.0.0".into(),
                version: "#1".into(),
            }
        }
    }

    struct FixedTelemetry {
        alive_cpus: usize,
        uptime: UptimeInfo,
    }
    impl Telemetry for FixedTelemetry {
        fn cpu_count(&self) -> usize {
            self.alive_cpus
        }
        fn total_cpu_usage(&self) -> CpuUsage {
            CpuUsage::default()
        }
        fn per_cpu_usage(&self) -> Option<Vec<CpuUsage>> {
            None
        }
        fn uptime(&self) -> UptimeInfo {
            self.uptime
        }
        fn mem_usage(&self) -> crate::collab::MemUsage {
            MemUsage::default()
        }
    }

    struct FixedVfs;
    impl Vfs for FixedVfs {
        fn filesystems(&self) -> String {
            "nodev\tproc\n".into()
        }
        fn mounts(&self) -> Vec<MountEntry> {
            vec![MountEntry {
                source: "/a b\tc\\d".into(),
                point: String::new(),
                fstype: "ext4".into(),
                read_only: false,
                no_suid: false,
                no_dev: false,
                no_exec: false,
                info: String::new(),
            }]
        }
    }

    struct DummySpace;
    impl MemorySpace for DummySpace {
        fn read_u32(&self, _addr: memory_addr::VirtAddr) -> Option<u32> {
            Some(0)
        }

        fn write_u32(&self, _addr: memory_addr::VirtAddr, _value: u32) -> bool {
            true
        }
    }

    fn make_root(alive_cpus: usize, uptime: UptimeInfo) -> ProcRoot {
        let tasks = Arc::new(TaskTable::new());
        let mm: Arc<dyn MemorySpace> = Arc::new(DummySpace);
        tasks.create(None, mm, CreateOpts::default()).unwrap();
        ProcRoot::new(
            tasks,
            Arc::new(FixedCpu),
            Arc::new(FixedTelemetry { alive_cpus, uptime }),
            Arc::new(FixedVfs),
            1,
        )
    }

    #[test]
    fn self_symlink_targets_current_pid() {
        let root = make_root(4, UptimeInfo::default());
        let node = root.lookup_static("self").unwrap();
        assert_eq!(root.readlink(node).unwrap(), "1/");
    }

    #[test]
    fn mounts_escapes_whitespace_and_backslash() {
        let root = make_root(4, UptimeInfo::default());
        let text = show_mounts(&root);
        assert_eq!(text, "/a\\040b\\011c\\134d / ext4 rw 0 0\n");
    }

    #[test]
    fn loadavg_matches_worked_example() {
        let root = make_root(
            4,
            UptimeInfo {
                uptime_ticks: 0,
                load_1m: 65536,
                load_5m: 32768,
                load_15m: 16384,
            },
        );
        for _ in 0..9 {
            let mm: Arc<dyn MemorySpace> = Arc::new(DummySpace);
            root.tasks.create(Some(&root.tasks.pid_get_task(1).unwrap()), mm, CreateOpts::default()).unwrap();
        }
        assert_eq!(root.tasks.count_alive(), 10);
        for pid in [2, 3, 4] {
            root.tasks
                .pid_get_task(pid)
                .unwrap()
                .io_block
                .store(true, std::sync::atomic::Ordering::Release);
        }
        let text = show_loadavg(&root);
        assert_eq!(text, "1.00 0.50 0.25 4/10 10\n");
    }

    #[test]
    fn readdir_lists_static_entries_before_pids() {
        let root = make_root(4, UptimeInfo::default());
        let (first, cursor) = root.readdir(ReaddirCursor(0)).unwrap();
        assert!(matches!(first, ReaddirEntry::Static("cpuinfo")));
        let mut cursor = cursor;
        let mut last_static = "cpuinfo";
        while let Some((entry, next)) = root.readdir(cursor) {
            match entry {
                ReaddirEntry::Static(name) => last_static = name,
                ReaddirEntry::Pid(pid) => {
                    assert_eq!(pid, 1);
                    assert_eq!(last_static, "vmstat");
                    return;
                }
            }
            cursor = next;
        }
        panic!("expected to find pid 1 entry");
    }

    #[test]
    fn readdir_exhausted_returns_none() {
        let root = make_root(4, UptimeInfo::default());
        let static_len = ROOT_ENTRIES.len() as u64;
        assert!(root.readdir(ReaddirCursor(static_len + crate::config::MAX_PID as u64)).is_none());
    }
}

//! Collaborator traits the core depends on but does not implement: CPU
//! identity, system telemetry, and a read-only VFS slice.
//!
//! `MemorySpace` lives in [`crate::mm`] since it is the one the futex
//! engine itself calls; the rest live here because the proc projection
//! is their only caller.

/// `do_uname`'s output.
#[derive(Clone)]
pub struct UtsName {
    pub sysname: String,
    pub release: String,
    pub version: String,
}

/// The CPU identity surface `/proc/cpuinfo` and `/proc/version` read.
pub trait CpuInfo: Send + Sync {
    /// `do_cpuid(&eax, &ebx, &ecx, &edx)`: runs CPUID for `leaf`, returning
    /// `(eax, ebx, ecx, edx)`.
    fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32);

    /// `do_uname(&uts)`.
    fn uname(&self) -> UtsName;
}

/// Aggregate CPU ticks in the `user/nice/system/idle` shape `/proc/stat`
/// expects.
#[derive(Clone, Copy, Default)]
pub struct CpuUsage {
    pub user_ticks: u64,
    pub nice_ticks: u64,
    pub system_ticks: u64,
    pub idle_ticks: u64,
}

/// `get_uptime()`'s return shape: elapsed ticks plus the three load
/// averages as 16.16 fixed-point values, the shape `/proc/loadavg` reads.
#[derive(Clone, Copy, Default)]
pub struct UptimeInfo {
    pub uptime_ticks: u64,
    pub load_1m: u64,
    pub load_5m: u64,
    pub load_15m: u64,
}

/// `get_mem_usage()`'s return shape, all fields in bytes.
#[derive(Clone, Copy, Default)]
pub struct MemUsage {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub active: u64,
    pub inactive: u64,
    pub cached: u64,
    pub swapins: u64,
    pub swapouts: u64,
    pub wirecount: u64,
}

/// System-wide telemetry the proc projection snapshots on every read.
pub trait Telemetry: Send + Sync {
    fn cpu_count(&self) -> usize;
    fn total_cpu_usage(&self) -> CpuUsage;
    /// One entry per CPU, or `None` if per-cpu breakdowns aren't tracked
    /// (`get_per_cpu_usage`'s `err` return).
    fn per_cpu_usage(&self) -> Option<Vec<CpuUsage>>;
    fn uptime(&self) -> UptimeInfo;
    fn mem_usage(&self) -> MemUsage;
}

/// One line of `/proc/mounts`.
#[derive(Clone)]
pub struct MountEntry {
    pub source: String,
    pub point: String,
    pub fstype: String,
    pub read_only: bool,
    pub no_suid: bool,
    pub no_dev: bool,
    pub no_exec: bool,
    /// Filesystem-specific options string, appended verbatim if non-empty.
    pub info: String,
}

/// The read-only slice of the VFS the proc projection needs.
pub trait Vfs: Send + Sync {
    /// Newline-separated lines, the same text `/proc/filesystems` serves
    /// verbatim.
    fn filesystems(&self) -> String;
    fn mounts(&self) -> Vec<MountEntry>;
}

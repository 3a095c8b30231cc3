//! Reference collaborator implementations, used to drive the crate end
//! to end without a real guest memory manager, CPU, or VFS behind it.

use std::{
    sync::{Mutex, RwLock},
    time::Instant,
};

use vkernel_core::{
    collab::{CpuInfo, CpuUsage, MemUsage, MountEntry, Telemetry, UptimeInfo, UtsName, Vfs},
    mm::MemorySpace,
};

/// A flat, growable guest address space backed by a plain `Vec<u32>`.
/// Reads/writes past the current length return `None`/`false` rather than
/// growing it — an emulator's real memory manager would map a fault to a
/// SIGSEGV, which this stand-in has no way to deliver.
pub struct FlatMemorySpace {
    words: RwLock<Vec<u32>>,
}

impl FlatMemorySpace {
    pub fn new(word_count: usize) -> Self {
        Self { words: RwLock::new(vec![0; word_count]) }
    }
}

impl MemorySpace for FlatMemorySpace {
    fn read_u32(&self, addr: memory_addr::VirtAddr) -> Option<u32> {
        self.words.read().unwrap().get(addr.as_usize()).copied()
    }

    fn write_u32(&self, addr: memory_addr::VirtAddr, value: u32) -> bool {
        match self.words.write().unwrap().get_mut(addr.as_usize()) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// A fixed, synthetic CPU identity — no real CPUID instruction is
/// available to a guest-memory-only crate, so this returns constants
/// shaped like a real leaf 0 / leaf 1 response.
pub struct FixedCpuInfo;

impl CpuInfo for FixedCpuInfo {
    fn cpuid(&self, leaf: u32) -> (u32, u32, u32, u32) {
        match leaf {
            0 => (1, 0x756e6547, 0x6c65746e, 0x49656e69), // "GenuineIntel"
            1 => (0x000306a9, 0, 0, 0x1783fbff),
            _ => (0, 0, 0, 0),
        }
    }

    fn uname(&self) -> UtsName {
        UtsName {
            sysname: "Linux".to_string(),
            release: "6.1.0-vkernel".to_string(),
            version: "#1 SMP".to_string(),
        }
    }
}

/// A [`Telemetry`] stub driven by the real task table for `cpu_count`'s
/// only dynamic input (load averages); everything else is a constant
/// shape, since no real scheduler or memory allocator sits behind this
/// crate.
pub struct DemoTelemetry {
    boot: Instant,
    cpu_count: usize,
    usage: Mutex<CpuUsage>,
}

impl DemoTelemetry {
    pub fn new(cpu_count: usize) -> Self {
        Self { boot: Instant::now(), cpu_count, usage: Mutex::new(CpuUsage::default()) }
    }

    /// Advances the idle-tick counter, used by the demo binary's scripted
    /// scenarios to produce a non-degenerate `/proc/stat`.
    pub fn tick_idle(&self, ticks: u64) {
        self.usage.lock().unwrap().idle_ticks += ticks;
    }
}

impl Telemetry for DemoTelemetry {
    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn total_cpu_usage(&self) -> CpuUsage {
        *self.usage.lock().unwrap()
    }

    fn per_cpu_usage(&self) -> Option<Vec<CpuUsage>> {
        None
    }

    fn uptime(&self) -> UptimeInfo {
        let ticks = self.boot.elapsed().as_secs() * 100;
        UptimeInfo { uptime_ticks: ticks, load_1m: 0, load_5m: 0, load_15m: 0 }
    }

    fn mem_usage(&self) -> MemUsage {
        MemUsage {
            total: 512 * 1024 * 1024,
            free: 400 * 1024 * 1024,
            available: 450 * 1024 * 1024,
            active: 50 * 1024 * 1024,
            inactive: 30 * 1024 * 1024,
            cached: 60 * 1024 * 1024,
            swapins: 0,
            swapouts: 0,
            wirecount: 0,
        }
    }
}

/// A small, static mount table — just enough for `/proc/mounts` and
/// `/proc/filesystems` to have something real to show.
pub struct DemoVfs {
    mounts: Vec<MountEntry>,
}

impl Default for DemoVfs {
    fn default() -> Self {
        Self {
            mounts: vec![
                MountEntry {
                    source: "rootfs".to_string(),
                    point: "/".to_string(),
                    fstype: "ext4".to_string(),
                    read_only: false,
                    no_suid: false,
                    no_dev: false,
                    no_exec: false,
                    info: String::new(),
                },
                MountEntry {
                    source: "proc".to_string(),
                    point: "/proc".to_string(),
                    fstype: "proc".to_string(),
                    read_only: false,
                    no_suid: true,
                    no_dev: true,
                    no_exec: true,
                    info: String::new(),
                },
            ],
        }
    }
}

impl Vfs for DemoVfs {
    fn filesystems(&self) -> String {
        "nodev\tproc\next4\n".to_string()
    }

    fn mounts(&self) -> Vec<MountEntry> {
        self.mounts.clone()
    }
}

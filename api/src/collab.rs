//! Re-exports the collaborator traits defined in `vkernel-core`. They live
//! in the core crate because the core's own components (the futex engine
//! for `MemorySpace`, the proc projection for the rest) call them
//! directly; this module is where the outer api/root crates look for
//! them instead of reaching into `vkernel_core` paths directly.

pub use vkernel_core::{
    collab::{CpuInfo, CpuUsage, MemUsage, MountEntry, Telemetry, UptimeInfo, UtsName, Vfs},
    mm::{MemorySpace, MemorySpaceHandle},
};

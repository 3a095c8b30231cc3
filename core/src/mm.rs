//! The boundary onto the guest address space.
//!
//! The real guest memory manager (page tables, `mem_ptr`, copy-on-write)
//! lives outside this crate entirely. What the futex engine and the
//! robust-list syscalls need from it is narrow enough to pin down as a
//! trait: reading and writing a 32-bit word at a guest address, and an
//! identity that two threads of the same thread group share and threads
//! of a different group do not.

use std::sync::Arc;

use memory_addr::VirtAddr;

/// A guest address space, as seen by the futex engine and the
/// `set_robust_list`/`get_robust_list` syscalls.
///
/// Implementations are expected to take their own read/write lock for the
/// duration of a call; the futex engine releases its read of this space
/// before entering the wait, so a reader/writer lock held only per-call
/// is enough.
pub trait MemorySpace: Send + Sync {
    /// Reads the 32-bit word at `addr`. Returns `None` if `addr` is
    /// unmapped or otherwise unreadable; callers translate that to
    /// `EFAULT`.
    fn read_u32(&self, addr: VirtAddr) -> Option<u32>;

    /// Writes the 32-bit word at `addr`. Returns `false` if `addr` is
    /// unmapped or otherwise unwritable; callers translate that to
    /// `EFAULT`.
    fn write_u32(&self, addr: VirtAddr, value: u32) -> bool;
}

/// A handle to a [`MemorySpace`], shared by every thread in one thread
/// group and used as the identity half of a futex key.
pub type MemorySpaceHandle = Arc<dyn MemorySpace>;

/// Returns an address-space-unique identity suitable for hashing/equality.
///
/// Two handles cloned from the same `Arc` (i.e. the same underlying
/// space) always return the same value; handles to different spaces are
/// extremely unlikely to collide but are not guaranteed unique forever if
/// a space is dropped and a new allocation happens to reuse the address —
/// the futex table does not outlive individual waits long enough for that
/// to matter in practice.
pub fn space_identity(space: &MemorySpaceHandle) -> usize {
    Arc::as_ptr(space) as *const () as usize
}

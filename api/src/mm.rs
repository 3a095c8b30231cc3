//! Guest pointers, expressed purely in terms of [`MemorySpace`] — there is
//! no host-addressable mapping for this crate to dereference directly;
//! the real page-table walk belongs to a guest memory manager this crate
//! does not implement.

use axerrno::{LinuxError, LinuxResult};
use memory_addr::VirtAddr;

use crate::collab::MemorySpace;

/// A guest pointer the caller may read through.
#[derive(Clone, Copy)]
pub struct UserConstPtr<T> {
    addr: VirtAddr,
    _marker: std::marker::PhantomData<T>,
}

/// A guest pointer the caller may read and write through.
#[derive(Clone, Copy)]
pub struct UserPtr<T> {
    addr: VirtAddr,
    _marker: std::marker::PhantomData<T>,
}

impl<T> UserConstPtr<T> {
    pub fn new(addr: VirtAddr) -> Self {
        Self { addr, _marker: std::marker::PhantomData }
    }

    pub fn address(&self) -> VirtAddr {
        self.addr
    }

    pub fn is_null(&self) -> bool {
        self.addr.as_usize() == 0
    }
}

impl<T> UserPtr<T> {
    pub fn new(addr: VirtAddr) -> Self {
        Self { addr, _marker: std::marker::PhantomData }
    }

    pub fn address(&self) -> VirtAddr {
        self.addr
    }

    pub fn is_null(&self) -> bool {
        self.addr.as_usize() == 0
    }
}

/// Runs `f` only if `ptr` is non-null, translating a null guest pointer to
/// `Ok(None)` instead of a read attempt — the common shape for an
/// optional `timespec`-like syscall argument.
#[macro_export]
macro_rules! nullable {
    ($ptr:expr, $body:expr) => {
        if $ptr.is_null() {
            Ok(None)
        } else {
            $body.map(Some)
        }
    };
}

fn read_words(space: &dyn MemorySpace, addr: VirtAddr, count: usize) -> LinuxResult<Vec<u32>> {
    let mut words = Vec::with_capacity(count);
    for i in 0..count {
        let word_addr = VirtAddr::from_usize(addr.as_usize() + i * 4);
        words.push(space.read_u32(word_addr).ok_or(LinuxError::EFAULT)?);
    }
    Ok(words)
}

fn write_words(space: &dyn MemorySpace, addr: VirtAddr, words: &[u32]) -> LinuxResult<()> {
    for (i, word) in words.iter().enumerate() {
        let word_addr = VirtAddr::from_usize(addr.as_usize() + i * 4);
        if !space.write_u32(word_addr, *word) {
            return Err(LinuxError::EFAULT);
        }
    }
    Ok(())
}

/// The guest `timespec`: two 32-bit words, `sec` then `nsec`.
#[derive(Clone, Copy, Default)]
pub struct TimeSpec {
    pub sec: u32,
    pub nsec: u32,
}

impl TimeSpec {
    /// Validates and converts to a host [`std::time::Duration`].
    /// `nsec` must be less than `1_000_000_000`.
    pub fn to_duration(self) -> LinuxResult<std::time::Duration> {
        if self.nsec >= 1_000_000_000 {
            return Err(LinuxError::EINVAL);
        }
        Ok(std::time::Duration::new(self.sec as u64, self.nsec))
    }
}

impl UserConstPtr<TimeSpec> {
    pub fn read(&self, space: &dyn MemorySpace) -> LinuxResult<TimeSpec> {
        let words = read_words(space, self.addr, 2)?;
        Ok(TimeSpec { sec: words[0], nsec: words[1] })
    }
}

/// The guest `robust_list_head`: three 32-bit little-endian words, `list`,
/// `offset`, `list_op_pending` — this is wire layout, not an
/// implementation detail free to change.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct RobustListHead {
    pub list: u32,
    pub offset: u32,
    pub list_op_pending: u32,
}

/// Byte length of the wire-format `robust_list_head`, used to validate the
/// `len` argument to `sys_set_robust_list`/`sys_get_robust_list`.
pub const ROBUST_LIST_HEAD_SIZE: usize = 12;

impl UserConstPtr<RobustListHead> {
    pub fn read(&self, space: &dyn MemorySpace) -> LinuxResult<RobustListHead> {
        let words = read_words(space, self.addr, 3)?;
        Ok(RobustListHead { list: words[0], offset: words[1], list_op_pending: words[2] })
    }
}

impl UserPtr<RobustListHead> {
    pub fn write(&self, space: &dyn MemorySpace, value: RobustListHead) -> LinuxResult<()> {
        write_words(space, self.addr, &[value.list, value.offset, value.list_op_pending])
    }
}

impl UserPtr<u32> {
    pub fn write(&self, space: &dyn MemorySpace, value: u32) -> LinuxResult<()> {
        write_words(space, self.addr, &[value])
    }
}

impl UserPtr<usize> {
    pub fn write(&self, space: &dyn MemorySpace, value: usize) -> LinuxResult<()> {
        write_words(space, self.addr, &[value as u32])
    }
}

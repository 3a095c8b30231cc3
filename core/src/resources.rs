//! Resource limits (`ThreadGroup.rlimits`).

use std::ops::{Index, IndexMut};

use linux_raw_sys::general::{RLIM_NLIMITS, RLIMIT_NOFILE, RLIMIT_STACK};

/// Default soft/hard limit on open file descriptors.
pub const DEFAULT_FILE_LIMIT: u64 = 1024;

/// Default guest stack size, in bytes, used to seed `RLIMIT_STACK`.
pub const DEFAULT_STACK_LIMIT: u64 = 8 * 1024 * 1024;

/// A single resource limit: soft (`current`) and hard (`max`) values.
#[derive(Default, Clone, Copy)]
pub struct Rlimit {
    /// The current, enforced limit.
    pub current: u64,
    /// The ceiling an unprivileged task may raise `current` to.
    pub max: u64,
}

impl Rlimit {
    /// Creates a new limit with the given soft and hard values.
    pub fn new(soft: u64, hard: u64) -> Self {
        Self {
            current: soft,
            max: hard,
        }
    }
}

impl From<u64> for Rlimit {
    fn from(value: u64) -> Self {
        Self {
            current: value,
            max: value,
        }
    }
}

/// One [`Rlimit`] per `RLIMIT_*` resource kind, indexed by the raw kernel
/// constant.
#[derive(Clone)]
pub struct Rlimits([Rlimit; RLIM_NLIMITS as usize]);

impl Default for Rlimits {
    fn default() -> Self {
        let mut result = Self([Rlimit::default(); RLIM_NLIMITS as usize]);
        result[RLIMIT_STACK] = DEFAULT_STACK_LIMIT.into();
        result[RLIMIT_NOFILE] = DEFAULT_FILE_LIMIT.into();
        result
    }
}

impl Index<u32> for Rlimits {
    type Output = Rlimit;

    fn index(&self, index: u32) -> &Self::Output {
        &self.0[index as usize]
    }
}

impl IndexMut<u32> for Rlimits {
    fn index_mut(&mut self, index: u32) -> &mut Self::Output {
        &mut self.0[index as usize]
    }
}

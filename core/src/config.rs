//! Tunable constants shared across the task table, futex engine, and proc
//! projection.

/// Highest pid the allocator will ever hand out. Pid 1 (init) and pid 0
/// (meaning "current" at most call sites) are never recycled into the
/// rotating search.
pub const MAX_PID: u32 = 1 << 15;

/// Number of buckets in the futex hash table: fixed-size open chaining,
/// not a growable map.
pub const FUTEX_HASH_BUCKETS: usize = 4096;

/// Maximum length of a task's command name, not counting the NUL.
pub const TASK_COMM_LEN: usize = 15;

/// Maximum number of supplementary group ids a task's credentials may carry.
pub const MAX_GROUPS: usize = 32;

/// Maximum POSIX timers per thread group.
pub const TIMERS_MAX: usize = 16;

/// Limit on robust-list traversal length, guarding against a corrupt or
/// cyclic guest-supplied list (mirrors `ROBUST_LIST_LIMIT` upstream).
pub const ROBUST_LIST_LIMIT: usize = 2048;

/// Ticks per second used by the proc projection's uptime/cpu accounting.
pub const TICKS_PER_SEC: u64 = 100;

/// Fixed-point scale (16.16) used for the three load averages.
pub const LOAD_FIXED_POINT_SCALE: u64 = 65536;

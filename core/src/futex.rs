//! Futex implementation (component B).
//!
//! One global lock covers the whole hash table and every queue
//! manipulation: no per-bucket locking, no lock-free queues. The lock is
//! released across the condition wait inside [`FutexTable::wait`], via
//! [`Condvar`].

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU32, AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use axerrno::{LinuxError, LinuxResult};
use memory_addr::VirtAddr;

use crate::{
    config::FUTEX_HASH_BUCKETS,
    mm::{MemorySpaceHandle, space_identity},
    task::Task,
};

/// Identifies a futex: the owning address space plus the guest address.
///
/// `PRIVATE`-vs-shared is informational only; both live in the same table —
/// shared futexes across address spaces are not supported, an acknowledged
/// limitation.
pub struct FutexKey {
    space: MemorySpaceHandle,
    addr: VirtAddr,
}

impl FutexKey {
    /// Creates a new futex key for `addr` within `space`.
    pub fn new(space: MemorySpaceHandle, addr: VirtAddr) -> Self {
        Self { space, addr }
    }

    fn identity(&self) -> (usize, usize) {
        (space_identity(&self.space), self.addr.as_usize())
    }

    fn bucket_index(&self) -> usize {
        let (space_id, addr) = self.identity();
        (addr ^ space_id) % FUTEX_HASH_BUCKETS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum WaitState {
    Waiting = 0,
    Woken = 1,
    TimedOut = 2,
}

/// A per-waiter record, shared between the blocked thread and whichever
/// slot's queue currently owns it — the owning slot may be reassigned by
/// `requeue`.
struct WaitNode {
    state: AtomicU8,
    /// Set by `FUTEX_WAIT_BITSET`/`FUTEX_WAKE_BITSET`; ANDed against the
    /// waker's mask before signaling.
    bitset: AtomicU32,
    /// The (bucket, space_id, addr) of the slot this node is currently
    /// queued on; mutated under the global lock by `requeue`.
    owner: Mutex<(usize, usize, usize)>,
}

impl WaitNode {
    fn new(bucket: usize, space_id: usize, addr: usize, bitset: u32) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(WaitState::Waiting as u8),
            bitset: AtomicU32::new(bitset),
            owner: Mutex::new((bucket, space_id, addr)),
        })
    }

    fn state(&self) -> WaitState {
        match self.state.load(Ordering::Acquire) {
            0 => WaitState::Waiting,
            1 => WaitState::Woken,
            _ => WaitState::TimedOut,
        }
    }

    fn set_state(&self, state: WaitState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

type WaitHandle = Arc<WaitNode>;

/// A single futex: the wait queue and bookkeeping for one `(space, addr)`
/// pair.
struct FutexSlot {
    space_id: usize,
    addr: usize,
    /// Pins the slot alive across the dropped lock during a WAIT call,
    /// and during the momentary WAKE/REQUEUE operation (see module docs).
    refcount: usize,
    waiters: VecDeque<WaitHandle>,
    /// Set when a robust-list owner dies while holding this futex.
    owner_dead: bool,
}

impl FutexSlot {
    fn new(space_id: usize, addr: usize) -> Self {
        Self {
            space_id,
            addr,
            refcount: 0,
            waiters: VecDeque::new(),
            owner_dead: false,
        }
    }
}

struct Buckets {
    chains: Vec<Vec<FutexSlot>>,
}

impl Buckets {
    fn new() -> Self {
        Self {
            chains: (0..FUTEX_HASH_BUCKETS).map(|_| Vec::new()).collect(),
        }
    }

    fn find(&self, bucket: usize, space_id: usize, addr: usize) -> Option<usize> {
        self.chains[bucket]
            .iter()
            .position(|s| s.space_id == space_id && s.addr == addr)
    }

    fn get_or_insert(&mut self, bucket: usize, space_id: usize, addr: usize) -> usize {
        if let Some(idx) = self.find(bucket, space_id, addr) {
            idx
        } else {
            self.chains[bucket].push(FutexSlot::new(space_id, addr));
            self.chains[bucket].len() - 1
        }
    }

    /// Drops the slot if it is now empty and unreferenced.
    fn maybe_remove(&mut self, bucket: usize, space_id: usize, addr: usize) {
        if let Some(idx) = self.find(bucket, space_id, addr) {
            let slot = &self.chains[bucket][idx];
            if slot.refcount == 0 && slot.waiters.is_empty() {
                self.chains[bucket].swap_remove(idx);
            }
        }
    }
}

/// The futex engine: one fixed-size hash table guarded by one lock, per
/// address space (private futexes) or shared globally (shared futexes) —
/// callers decide which `FutexTable` instance a key routes to.
pub struct FutexTable {
    state: Mutex<Buckets>,
    cond: Arc<Condvar>,
}

impl Default for FutexTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FutexTable {
    /// Creates an empty futex table.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Buckets::new()),
            cond: Arc::new(Condvar::new()),
        }
    }

    /// `FUTEX_WAIT` / `FUTEX_WAIT_BITSET`. Blocks `task` while
    /// `*addr == expected`.
    ///
    /// While actually blocked, `task` is recorded as may-block (so
    /// `TaskTable::count_blocked` and `/proc/[pid]/stat`'s `D` state see
    /// it) and its wait slot points at this table's condition variable, so
    /// a signal delivered to `task` can interrupt the wait without this
    /// engine knowing anything about signals: [`Task::deliver_signal`]
    /// wakes the recorded condition, and the next loop iteration notices
    /// the pending, unblocked signal and returns `EINTR` instead of
    /// looping back to sleep.
    pub fn wait(
        &self,
        task: &Arc<Task>,
        key: &FutexKey,
        expected: u32,
        bitset: u32,
        timeout: Option<Duration>,
    ) -> LinuxResult<()> {
        // (1) Acquire futex lock.
        let mut table = self.state.lock().unwrap();

        // (3) Read guest memory at addr (while the caller's read lock on
        // the memory space, if any, is already held by `read_u32`).
        let value = key.space.read_u32(key.addr).ok_or(LinuxError::EFAULT)?;
        // (4) Compare.
        if value != expected {
            return Err(LinuxError::EAGAIN);
        }

        let (space_id, addr) = key.identity();
        let bucket = key.bucket_index();
        let idx = table.get_or_insert(bucket, space_id, addr);
        table.chains[bucket][idx].refcount += 1;

        // (5) Create a FutexWait, append to the queue, block.
        let node = WaitNode::new(bucket, space_id, addr, bitset);
        table.chains[bucket][idx].waiters.push_back(node.clone());

        let _guard = task.enter_may_block();
        task.wait_slot.record(self.cond.clone());

        let deadline = timeout.map(|d| Instant::now() + d);
        let mut interrupted = false;
        loop {
            if node.state() != WaitState::Waiting {
                break;
            }
            if task.has_unblocked_signal() {
                interrupted = true;
                break;
            }
            table = match deadline {
                None => self.cond.wait(table).unwrap(),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        break;
                    }
                    let (guard, _timeout_result) =
                        self.cond.wait_timeout(table, dl - now).unwrap();
                    guard
                }
            };
        }
        task.wait_slot.clear();

        // (6) On wake, remove from whatever queue it is now on (it may
        // have been requeued), drop the refcount, release the lock.
        let result = match node.state() {
            WaitState::Woken => Ok(()),
            _ => {
                // Either it never got woken (real timeout, or a signal
                // arrived) or the clock raced the waker; settle by
                // checking state one more time.
                if node.state() == WaitState::Waiting {
                    node.set_state(WaitState::TimedOut);
                    let (_, cur_space, cur_addr) = *node.owner.lock().unwrap();
                    let cur_bucket = (cur_addr ^ cur_space) % FUTEX_HASH_BUCKETS;
                    if let Some(idx) = table.find(cur_bucket, cur_space, cur_addr) {
                        let slot = &mut table.chains[cur_bucket][idx];
                        slot.waiters.retain(|w| !Arc::ptr_eq(w, &node));
                        slot.refcount -= 1;
                        table.maybe_remove(cur_bucket, cur_space, cur_addr);
                    }
                    if interrupted {
                        Err(LinuxError::EINTR)
                    } else {
                        Err(LinuxError::ETIMEDOUT)
                    }
                } else {
                    Ok(())
                }
            }
        };

        if result.is_ok() {
            let was_owner_dead = {
                let (_, cur_space, cur_addr) = *node.owner.lock().unwrap();
                let cur_bucket = (cur_addr ^ cur_space) % FUTEX_HASH_BUCKETS;
                table
                    .find(cur_bucket, cur_space, cur_addr)
                    .map(|idx| std::mem::take(&mut table.chains[cur_bucket][idx].owner_dead))
                    .unwrap_or(false)
            };
            if was_owner_dead {
                return Err(LinuxError::EOWNERDEAD);
            }
        }
        result
    }

    /// `FUTEX_WAKE` / `FUTEX_WAKE_BITSET`. Returns the number woken.
    pub fn wake(&self, key: &FutexKey, max_n: u32, wake_mask: Option<u32>) -> u32 {
        let mut table = self.state.lock().unwrap();
        let (space_id, addr) = key.identity();
        let bucket = key.bucket_index();
        let Some(idx) = table.find(bucket, space_id, addr) else {
            return 0;
        };

        let mut woken = 0u32;
        let mut remaining = VecDeque::new();
        let waiters = std::mem::take(&mut table.chains[bucket][idx].waiters);
        for w in waiters {
            let eligible = woken < max_n
                && wake_mask.is_none_or(|mask| w.bitset.load(Ordering::Acquire) & mask != 0);
            if eligible {
                w.set_state(WaitState::Woken);
                table.chains[bucket][idx].refcount -= 1;
                woken += 1;
            } else {
                remaining.push_back(w);
            }
        }
        table.chains[bucket][idx].waiters = remaining;
        table.maybe_remove(bucket, space_id, addr);
        drop(table);

        if woken > 0 {
            self.cond.notify_all();
        }
        woken
    }

    /// `FUTEX_REQUEUE` / `FUTEX_CMP_REQUEUE`. Wakes up to `max_wake` on
    /// `key`, then moves up to `max_requeue` of the rest onto `key2`.
    /// Returns woken + requeued.
    pub fn requeue(&self, key: &FutexKey, max_wake: u32, max_requeue: u32, key2: &FutexKey) -> u32 {
        let mut table = self.state.lock().unwrap();
        let (space_id, addr) = key.identity();
        let bucket = key.bucket_index();
        let (space_id2, addr2) = key2.identity();
        let bucket2 = key2.bucket_index();

        let Some(idx) = table.find(bucket, space_id, addr) else {
            return 0;
        };
        // Pin both sides for the duration of this operation (mirrors the
        // original's `futex_get`/`futex_put` bracketing).
        table.chains[bucket][idx].refcount += 1;
        let idx2 = table.get_or_insert(bucket2, space_id2, addr2);
        table.chains[bucket2][idx2].refcount += 1;

        let mut woken = 0u32;
        let waiters = std::mem::take(&mut table.chains[bucket][idx].waiters);
        let mut iter = waiters.into_iter();
        let mut remaining = VecDeque::new();
        for w in iter.by_ref() {
            if woken >= max_wake {
                remaining.push_back(w);
                break;
            }
            w.set_state(WaitState::Woken);
            debug_assert!(table.chains[bucket][idx].refcount > 1);
            table.chains[bucket][idx].refcount -= 1;
            woken += 1;
        }
        remaining.extend(iter);

        let mut requeued = 0u32;
        while requeued < max_requeue {
            let Some(w) = remaining.pop_front() else {
                break;
            };
            *w.owner.lock().unwrap() = (bucket2, space_id2, addr2);
            // Open Question #2 in DESIGN.md: this assert mirrors the
            // original's `assert(refcount > 1)` guarding the transfer.
            debug_assert!(table.chains[bucket][idx].refcount > 1);
            table.chains[bucket][idx].refcount -= 1;
            table.chains[bucket2][idx2].refcount += 1;
            table.chains[bucket2][idx2].waiters.push_back(w);
            requeued += 1;
        }

        table.chains[bucket][idx].waiters = remaining;
        // Release our own pin from both sides.
        table.chains[bucket][idx].refcount -= 1;
        table.chains[bucket2][idx2].refcount -= 1;
        table.maybe_remove(bucket, space_id, addr);
        table.maybe_remove(bucket2, space_id2, addr2);
        drop(table);

        if woken > 0 {
            self.cond.notify_all();
        }
        woken + requeued
    }

    /// Marks the futex at `key` as having a dead owner and wakes one
    /// waiter, for robust-list cleanup on task exit (grounded on
    /// `handle_futex_death` in the original source).
    pub fn mark_owner_dead(&self, key: &FutexKey) {
        let mut table = self.state.lock().unwrap();
        let (space_id, addr) = key.identity();
        let bucket = key.bucket_index();
        if let Some(idx) = table.find(bucket, space_id, addr) {
            table.chains[bucket][idx].owner_dead = true;
        }
        drop(table);
        self.wake(key, 1, None);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use proptest::prelude::*;

    use super::*;
    use crate::task::{CreateOpts, TaskTable};

    struct FlatMemory(Mutex<Vec<u32>>);
    impl FlatMemory {
        fn new(words: usize) -> Arc<Self> {
            Arc::new(Self(Mutex::new(vec![0; words])))
        }
        fn set(&self, idx: usize, val: u32) {
            self.0.lock().unwrap()[idx] = val;
        }
    }
    impl MemorySpace for FlatMemory {
        fn read_u32(&self, addr: VirtAddr) -> Option<u32> {
            self.0.lock().unwrap().get(addr.as_usize()).copied()
        }

        fn write_u32(&self, addr: VirtAddr, value: u32) -> bool {
            match self.0.lock().unwrap().get_mut(addr.as_usize()) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }
    }

    use crate::mm::MemorySpace;

    /// A standalone task, backed by its own single-task table, suitable
    /// for futex tests that need something real to pass to `wait`.
    fn spawn_task(mm: Arc<dyn MemorySpace>) -> Arc<Task> {
        TaskTable::new().create(None, mm, CreateOpts::default()).unwrap()
    }

    #[test]
    fn wait_wake_ping_pong() {
        let mem = FlatMemory::new(4);
        mem.set(0, 1);
        let table = Arc::new(FutexTable::new());
        let barrier = Arc::new(Barrier::new(2));
        let task = spawn_task(mem.clone());

        let t_table = table.clone();
        let t_mem: Arc<dyn MemorySpace> = mem.clone();
        let t_barrier = barrier.clone();
        let t_task = task.clone();
        let waiter = thread::spawn(move || {
            let key = FutexKey::new(t_mem, VirtAddr::from_usize(0));
            t_barrier.wait();
            t_table.wait(&t_task, &key, 1, u32::MAX, None)
        });

        barrier.wait();
        // give the waiter a moment to enqueue; a real implementation
        // would synchronize more precisely, this is good enough for a
        // same-process sanity test.
        thread::sleep(Duration::from_millis(20));
        mem.set(0, 2);
        let space: Arc<dyn MemorySpace> = mem.clone();
        let woken = table.wake(&FutexKey::new(space, VirtAddr::from_usize(0)), 1, None);
        assert_eq!(woken, 1);
        assert!(waiter.join().unwrap().is_ok());
        assert!(!task.io_block.load(Ordering::Acquire));
    }

    #[test]
    fn wait_compare_fail_returns_eagain() {
        let mem = FlatMemory::new(4);
        mem.set(0, 7);
        let table = FutexTable::new();
        let space: Arc<dyn MemorySpace> = mem.clone();
        let task = spawn_task(mem);
        let err = table
            .wait(&task, &FutexKey::new(space, VirtAddr::from_usize(0)), 3, u32::MAX, None)
            .unwrap_err();
        assert_eq!(err, LinuxError::EAGAIN);
        // never actually blocked: a failed compare never sets io_block.
        assert!(!task.io_block.load(Ordering::Acquire));
    }

    #[test]
    fn wait_zero_timeout_times_out_when_value_matches() {
        let mem = FlatMemory::new(4);
        mem.set(0, 5);
        let table = FutexTable::new();
        let space: Arc<dyn MemorySpace> = mem.clone();
        let task = spawn_task(mem);
        let err = table
            .wait(
                &task,
                &FutexKey::new(space, VirtAddr::from_usize(0)),
                5,
                u32::MAX,
                Some(Duration::from_millis(0)),
            )
            .unwrap_err();
        assert_eq!(err, LinuxError::ETIMEDOUT);
    }

    #[test]
    fn signal_interrupts_wait_with_eintr() {
        let mem = FlatMemory::new(4);
        mem.set(0, 1);
        let table = Arc::new(FutexTable::new());
        let barrier = Arc::new(Barrier::new(2));
        let task = spawn_task(mem.clone());

        let t_table = table.clone();
        let t_mem: Arc<dyn MemorySpace> = mem.clone();
        let t_barrier = barrier.clone();
        let t_task = task.clone();
        let waiter = thread::spawn(move || {
            let key = FutexKey::new(t_mem, VirtAddr::from_usize(0));
            t_barrier.wait();
            t_table.wait(&t_task, &key, 1, u32::MAX, None)
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        assert!(task.io_block.load(Ordering::Acquire));

        task.deliver_signal(10); // SIGUSR1
        let result = waiter.join().unwrap();
        assert_eq!(result.unwrap_err(), LinuxError::EINTR);
        assert!(!task.io_block.load(Ordering::Acquire));
    }

    #[test]
    fn requeue_conserves_waiter_count() {
        let mem = FlatMemory::new(8);
        let table = Arc::new(FutexTable::new());
        let barrier = Arc::new(Barrier::new(6));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let t_table = table.clone();
            let space: Arc<dyn MemorySpace> = mem.clone();
            let t_barrier = barrier.clone();
            let t_task = spawn_task(mem.clone());
            handles.push(thread::spawn(move || {
                let key = FutexKey::new(space, VirtAddr::from_usize(0));
                t_barrier.wait();
                t_table.wait(&t_task, &key, 0, u32::MAX, None)
            }));
        }
        barrier.wait();
        thread::sleep(Duration::from_millis(30));

        let space_a: Arc<dyn MemorySpace> = mem.clone();
        let space_b: Arc<dyn MemorySpace> = mem.clone();
        let total = table.requeue(
            &FutexKey::new(space_a, VirtAddr::from_usize(0)),
            2,
            10,
            &FutexKey::new(space_b, VirtAddr::from_usize(4)),
        );
        assert_eq!(total, 5);

        let space_b2: Arc<dyn MemorySpace> = mem.clone();
        let remaining_woken = table.wake(&FutexKey::new(space_b2, VirtAddr::from_usize(4)), 10, None);
        assert_eq!(remaining_woken, 3);

        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
    }

    fn dummy_key(addr: usize) -> (Arc<dyn MemorySpace>, FutexKey) {
        let mem = FlatMemory::new(4);
        let space: Arc<dyn MemorySpace> = mem;
        let key = FutexKey::new(space.clone(), VirtAddr::from_usize(addr));
        (space, key)
    }

    proptest! {
        /// Wake monotonicity + queue consistency: `wake` never reports
        /// more woken than either `max_n` or the number actually queued,
        /// and whatever's left in the queue afterward is exactly the
        /// difference.
        #[test]
        fn wake_never_exceeds_requested_or_available(n_waiters in 0usize..20, max_n in 0u32..25) {
            let (_space, key) = dummy_key(100);
            let (space_id, addr) = key.identity();
            let bucket = key.bucket_index();
            let table = FutexTable::new();
            {
                let mut state = table.state.lock().unwrap();
                let idx = state.get_or_insert(bucket, space_id, addr);
                for _ in 0..n_waiters {
                    let node = WaitNode::new(bucket, space_id, addr, u32::MAX);
                    state.chains[bucket][idx].waiters.push_back(node);
                    state.chains[bucket][idx].refcount += 1;
                }
            }

            let woken = table.wake(&key, max_n, None);
            prop_assert!(woken <= max_n);
            prop_assert!(woken as usize <= n_waiters);

            let state = table.state.lock().unwrap();
            let remaining = state
                .find(bucket, space_id, addr)
                .map(|idx| state.chains[bucket][idx].waiters.len())
                .unwrap_or(0);
            prop_assert_eq!(remaining, n_waiters - woken as usize);
        }

        /// Requeue conservation: the total handled (woken + requeued)
        /// never exceeds the number of waiters that were actually queued.
        #[test]
        fn requeue_never_exceeds_available_waiters(
            n_waiters in 0usize..20,
            max_wake in 0u32..10,
            max_requeue in 0u32..15,
        ) {
            let (space, key) = dummy_key(0);
            let key2 = FutexKey::new(space, VirtAddr::from_usize(4));
            let (space_id, addr) = key.identity();
            let bucket = key.bucket_index();
            let table = FutexTable::new();
            {
                let mut state = table.state.lock().unwrap();
                let idx = state.get_or_insert(bucket, space_id, addr);
                for _ in 0..n_waiters {
                    let node = WaitNode::new(bucket, space_id, addr, u32::MAX);
                    state.chains[bucket][idx].waiters.push_back(node);
                    state.chains[bucket][idx].refcount += 1;
                }
            }

            let total = table.requeue(&key, max_wake, max_requeue, &key2);
            prop_assert!(total as usize <= n_waiters);
        }
    }
}

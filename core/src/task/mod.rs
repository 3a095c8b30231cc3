//! Guest task, thread-group, and pid table management (component A).
//!
//! Per the cyclic-structure note: the task table is the sole owner of every
//! [`Task`]. Everything else — `ThreadGroup.leader`, `Task.parent`,
//! `Task.children`, session and pgroup membership — is stored as a pid
//! integer and resolved back through [`TaskTable`] under its lock, never as
//! an owning pointer. This avoids reference cycles without a tracing GC.

mod stat;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axerrno::{LinuxError, LinuxResult};

pub use self::stat::TaskStat;
use crate::{
    config::{MAX_GROUPS, MAX_PID, TASK_COMM_LEN, TIMERS_MAX},
    futex::FutexTable,
    mm::MemorySpaceHandle,
    resources::Rlimits,
};

/// Real/effective/saved credentials plus supplementary groups.
#[derive(Clone)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
    pub suid: u32,
    pub sgid: u32,
    pub groups: Vec<u32>,
}

impl Credentials {
    /// Root credentials, used for pid 1 and any task created with no
    /// parent to inherit from.
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            suid: 0,
            sgid: 0,
            groups: Vec::new(),
        }
    }

    fn add_group(&mut self, gid: u32) -> LinuxResult<()> {
        if self.groups.len() >= MAX_GROUPS {
            return Err(LinuxError::EINVAL);
        }
        self.groups.push(gid);
        Ok(())
    }
}

/// Opaque, refcounted file-descriptor table. The real table (open files,
/// close-on-exec bits) lives with the VFS layer, out of scope here; this
/// crate only needs an object whose identity can be shared or forked on
/// clone.
#[derive(Default)]
pub struct FdTable;

/// Opaque, refcounted filesystem context (cwd, root, umask). See
/// [`FdTable`] for why it's a marker here.
#[derive(Default)]
pub struct FsInfo;

/// A queued `siginfo`-equivalent record.
pub struct SigInfo {
    pub signo: u32,
    pub code: i32,
}

/// Per-task signal-related state. Delivery mechanics (choosing a target
/// thread within a group, dispatching a handler) are an external
/// collaborator's job; what lives here is the data that collaborator reads
/// and writes, plus the pending/blocked bitmasks
/// [`Task::has_unblocked_signal`] consults to decide whether a blocked task
/// should wake with `EINTR`.
#[derive(Default)]
pub struct SignalState {
    pub pending: Mutex<u64>,
    pub blocked: Mutex<u64>,
    /// Set while the task is inside `sigtimedwait`; `None` otherwise.
    pub waiting: Mutex<Option<u64>>,
    pub queue: Mutex<VecDeque<SigInfo>>,
}

/// The condition variable a task is presently blocked on, recorded so
/// signal delivery can wake it without the futex engine (or any other
/// subsystem) needing to know anything about signals.
#[derive(Default)]
pub struct WaitSlot {
    current: Mutex<Option<Arc<Condvar>>>,
}

impl WaitSlot {
    /// Records the condition a blocking call is about to wait on.
    pub fn record(&self, cond: Arc<Condvar>) {
        *self.current.lock().unwrap() = Some(cond);
    }

    /// Clears the slot after returning from a wait.
    pub fn clear(&self) {
        *self.current.lock().unwrap() = None;
    }

    /// Wakes whatever condition is currently recorded, if any. Used by
    /// signal delivery to force a blocked task back to a normal return
    /// (translated to `EINTR` by the waiting primitive, once it notices
    /// the pending signal).
    pub fn notify(&self) {
        if let Some(cond) = self.current.lock().unwrap().as_ref() {
            cond.notify_all();
        }
    }
}

/// The handoff record a `vfork`ing parent blocks on until the child exits.
/// This crate does not model `exec`, so the only release point
/// implemented is the child exiting — see [`TaskTable::destroy`].
#[derive(Default)]
pub struct VforkHandoff {
    done: Mutex<bool>,
    cond: Arc<Condvar>,
}

impl VforkHandoff {
    /// Blocks `task` (the vforking parent) until [`Self::notify_done`] is
    /// called, recording the condition in `task`'s wait slot and marking
    /// it may-block for the duration.
    pub fn wait(&self, task: &Arc<Task>) {
        let _guard = task.enter_may_block();
        task.wait_slot.record(self.cond.clone());
        let mut guard = self.done.lock().unwrap();
        while !*guard {
            guard = self.cond.wait(guard).unwrap();
        }
        task.wait_slot.clear();
    }

    /// Marks the handoff complete and wakes the waiting parent.
    pub fn notify_done(&self) {
        *self.done.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

/// A POSIX interval timer slot (`ThreadGroup.posix_timers`). Arming and
/// firing are the timer subsystem's job, out of scope here; the table
/// exists so thread-group teardown has something concrete to clear.
#[derive(Clone, Copy)]
pub struct PosixTimer {
    pub timer_id: i32,
    pub signo: u32,
}

/// A guest thread — the unit the task table owns and the futex engine and
/// proc projection both reference.
pub struct Task {
    pub pid: u32,
    pub tgid: u32,
    pub credentials: Mutex<Credentials>,
    pub comm: Mutex<String>,
    pub thread_group: Arc<ThreadGroup>,
    pub mm: MemorySpaceHandle,
    pub fd_table: Arc<FdTable>,
    pub fs_info: Arc<FsInfo>,
    pub signal: SignalState,
    /// Guest pointer cleared (and futex-woken) on thread exit, or 0.
    pub clear_tid: AtomicUsize,
    /// Guest pointer to the head of the robust futex list, or 0.
    pub robust_list: AtomicUsize,
    critical_region: Mutex<i32>,
    critical_region_cond: Condvar,
    pub locks_held: AtomicI32,
    pub io_block: AtomicBool,
    pub vfork: Mutex<Option<Arc<VforkHandoff>>>,
    parent: Mutex<Option<u32>>,
    children: Mutex<Vec<u32>>,
    pub exit_code: AtomicI32,
    pub zombie: AtomicBool,
    pub exiting: AtomicBool,
    pub wait_slot: WaitSlot,
}

impl Task {
    /// Truncates and NUL-pads `name` the way `update_thread_name` does
    /// upstream (comm is capped at [`TASK_COMM_LEN`] characters).
    pub fn set_comm(&self, name: &str) {
        let truncated: String = name.chars().take(TASK_COMM_LEN).collect();
        *self.comm.lock().unwrap() = truncated;
    }

    /// `"{comm}-{pid}"`, used to label the host thread backing this task.
    pub fn host_thread_label(&self) -> String {
        format!("{}-{}", self.comm.lock().unwrap(), self.pid)
    }

    /// Enters a may-block region: sets `io_block` and bumps
    /// `critical_region` for the lifetime of the returned guard. Every
    /// primitive that can genuinely put a task to sleep (futex wait,
    /// vfork handoff, waiting for a child to exit) wraps its blocking call
    /// in this, so `TaskTable::count_blocked` and `/proc/[pid]/stat`'s `D`
    /// state see real blocked time rather than a hypothetical one.
    pub fn enter_may_block(self: &Arc<Self>) -> MayBlockGuard {
        self.enter_critical_region();
        self.io_block.store(true, Ordering::Release);
        MayBlockGuard { task: self.clone() }
    }

    fn enter_critical_region(&self) {
        *self.critical_region.lock().unwrap() += 1;
    }

    fn leave_critical_region(&self) {
        let mut guard = self.critical_region.lock().unwrap();
        *guard -= 1;
        if *guard == 0 {
            self.critical_region_cond.notify_all();
        }
    }

    fn critical_region_count(&self) -> i32 {
        *self.critical_region.lock().unwrap()
    }

    fn wait_for_critical_region_zero(&self) {
        let mut guard = self.critical_region.lock().unwrap();
        while *guard > 0 {
            guard = self.critical_region_cond.wait(guard).unwrap();
        }
    }

    /// True if this task is the thread-group leader (`tgid == pid`).
    pub fn is_leader(&self) -> bool {
        self.thread_group.leader_pid == self.pid
    }

    /// The parent's pid, if any (resolve via [`TaskTable::pid_get_task`]).
    pub fn parent_pid(&self) -> Option<u32> {
        *self.parent.lock().unwrap()
    }

    /// A snapshot of this task's child pids.
    pub fn child_pids(&self) -> Vec<u32> {
        self.children.lock().unwrap().clone()
    }

    /// True if a signal is pending and not currently blocked — the
    /// condition every blocking wait in this crate checks before going
    /// back to sleep, to decide whether to return `EINTR` instead.
    pub fn has_unblocked_signal(&self) -> bool {
        let pending = *self.signal.pending.lock().unwrap();
        let blocked = *self.signal.blocked.lock().unwrap();
        pending & !blocked != 0
    }

    /// Marks `signo` pending and wakes whatever this task is currently
    /// blocked on via its wait slot. Delivery proper — choosing a target
    /// thread within a group, handler dispatch — is the signal
    /// collaborator's job; this is the one piece every blocking primitive
    /// here needs in order to cooperate with it.
    pub fn deliver_signal(&self, signo: u32) {
        *self.signal.pending.lock().unwrap() |= 1u64 << (u64::from(signo) % 64);
        self.wait_slot.notify();
    }
}

/// RAII guard returned by [`Task::enter_may_block`]; clears `io_block` and
/// drops the critical-region count on scope exit.
pub struct MayBlockGuard {
    task: Arc<Task>,
}

impl Drop for MayBlockGuard {
    fn drop(&mut self) {
        self.task.io_block.store(false, Ordering::Release);
        self.task.leave_critical_region();
    }
}

/// State shared by every task in one thread group.
pub struct ThreadGroup {
    pub leader_pid: u32,
    members: Mutex<Vec<u32>>,
    pub sid: AtomicU32,
    pub pgid: AtomicU32,
    pub tty: Mutex<Option<u32>>,
    posix_timers: Mutex<[Option<PosixTimer>; TIMERS_MAX]>,
    pub rlimits: Mutex<Rlimits>,
    pub doing_group_exit: AtomicBool,
    pub group_exit_code: AtomicI32,
    child_exit_lock: Mutex<()>,
    child_exit_cond: Arc<Condvar>,
    pub personality: AtomicU32,
    /// Private futexes for this address space: one table per
    /// collaborating thread group, not a single global table.
    pub futex_table: Arc<FutexTable>,
}

impl ThreadGroup {
    fn new(leader_pid: u32) -> Arc<Self> {
        Arc::new(Self {
            leader_pid,
            members: Mutex::new(vec![leader_pid]),
            sid: AtomicU32::new(leader_pid),
            pgid: AtomicU32::new(leader_pid),
            tty: Mutex::new(None),
            posix_timers: Mutex::new([None; TIMERS_MAX]),
            rlimits: Mutex::new(Rlimits::default()),
            doing_group_exit: AtomicBool::new(false),
            group_exit_code: AtomicI32::new(0),
            child_exit_lock: Mutex::new(()),
            child_exit_cond: Arc::new(Condvar::new()),
            personality: AtomicU32::new(0),
            futex_table: Arc::new(FutexTable::new()),
        })
    }

    /// Member tids, in creation order.
    pub fn members(&self) -> Vec<u32> {
        self.members.lock().unwrap().clone()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    /// Blocks `task` (a `wait4`/`waitpid`-family caller) until a child of
    /// this group exits, or `timeout` elapses. [`TaskTable::destroy`]
    /// wakes this when a thread-group leader departs.
    pub fn wait_for_child_exit(&self, task: &Arc<Task>, timeout: Option<Duration>) -> LinuxResult<()> {
        if task.has_unblocked_signal() {
            return Err(LinuxError::EINTR);
        }
        let _guard = task.enter_may_block();
        task.wait_slot.record(self.child_exit_cond.clone());
        let guard = self.child_exit_lock.lock().unwrap();
        let result = match timeout {
            None => {
                drop(self.child_exit_cond.wait(guard).unwrap());
                Ok(())
            }
            Some(d) => {
                let (_, res) = self.child_exit_cond.wait_timeout(guard, d).unwrap();
                if res.timed_out() {
                    Err(LinuxError::ETIMEDOUT)
                } else {
                    Ok(())
                }
            }
        };
        task.wait_slot.clear();
        result
    }

    /// Signals [`Self::wait_for_child_exit`] waiters.
    pub fn notify_child_exit(&self) {
        let _guard = self.child_exit_lock.lock().unwrap();
        self.child_exit_cond.notify_all();
    }
}

/// Sharing flags for [`TaskTable::create`], mirroring the guest `clone(2)`
/// flag surface.
#[derive(Default, Clone, Copy)]
pub struct CreateOpts {
    pub share_fds: bool,
    pub share_fs: bool,
    pub new_thread_group: bool,
    /// `vfork(2)` semantics: the calling thread (the parent passed to
    /// `create`) blocks inside `create` itself until the new task exits.
    pub vfork: bool,
}

struct Inner {
    tasks: HashMap<u32, Arc<Task>>,
    next_pid: u32,
    last_allocated: u32,
    sessions: HashMap<u32, Vec<u32>>,
    pgroups: HashMap<u32, Vec<u32>>,
}

/// The process/task table: owns every [`Task`], hands out pids, and
/// resolves session/pgroup membership. One instance per emulator run — a
/// module-scoped value a caller constructs and owns, not a static
/// constructor.
pub struct TaskTable {
    inner: Mutex<Inner>,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    /// Creates an empty table. Call [`Self::create`] with `parent = None`
    /// to seed pid 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                next_pid: 1,
                last_allocated: 0,
                sessions: HashMap::new(),
                pgroups: HashMap::new(),
            }),
        }
    }

    fn alloc_pid(inner: &mut Inner) -> LinuxResult<u32> {
        let start = inner.next_pid.max(2);
        let mut candidate = start;
        for _ in 0..MAX_PID {
            if candidate == 0 || candidate == 1 {
                candidate = 2;
            }
            if !inner.tasks.contains_key(&candidate) {
                inner.next_pid = if candidate + 1 >= MAX_PID {
                    2
                } else {
                    candidate + 1
                };
                inner.last_allocated = candidate;
                return Ok(candidate);
            }
            candidate = if candidate + 1 >= MAX_PID {
                2
            } else {
                candidate + 1
            };
        }
        Err(LinuxError::EAGAIN)
    }

    /// Creates a new task. `parent = None` creates pid 1 with root
    /// credentials; otherwise fields are cloned from `parent` per `opts`.
    /// If `opts.vfork` is set, this call blocks until the new task exits
    /// before returning.
    pub fn create(
        &self,
        parent: Option<&Arc<Task>>,
        mm: MemorySpaceHandle,
        opts: CreateOpts,
    ) -> LinuxResult<Arc<Task>> {
        let mut inner = self.inner.lock().unwrap();
        let pid = if parent.is_none() {
            if inner.tasks.contains_key(&1) {
                return Err(LinuxError::EEXIST);
            }
            inner.last_allocated = 1;
            1
        } else {
            Self::alloc_pid(&mut inner)?
        };

        let (tgid, thread_group, credentials, fd_table, fs_info, parent_pid) = match parent {
            None => (
                pid,
                ThreadGroup::new(pid),
                Credentials::root(),
                Arc::new(FdTable),
                Arc::new(FsInfo),
                None,
            ),
            Some(p) => {
                let thread_group = if opts.new_thread_group {
                    ThreadGroup::new(pid)
                } else {
                    p.thread_group.clone()
                };
                let tgid = if opts.new_thread_group { pid } else { p.tgid };
                let fd_table = if opts.share_fds {
                    p.fd_table.clone()
                } else {
                    Arc::new(FdTable)
                };
                let fs_info = if opts.share_fs {
                    p.fs_info.clone()
                } else {
                    Arc::new(FsInfo)
                };
                (
                    tgid,
                    thread_group,
                    p.credentials.lock().unwrap().clone(),
                    fd_table,
                    fs_info,
                    Some(p.pid),
                )
            }
        };

        if tgid != pid {
            thread_group.members.lock().unwrap().push(pid);
        }

        let task = Arc::new(Task {
            pid,
            tgid,
            credentials: Mutex::new(credentials),
            comm: Mutex::new(String::from("task")),
            thread_group,
            mm,
            fd_table,
            fs_info,
            signal: SignalState::default(),
            clear_tid: AtomicUsize::new(0),
            robust_list: AtomicUsize::new(0),
            critical_region: Mutex::new(0),
            critical_region_cond: Condvar::new(),
            locks_held: AtomicI32::new(0),
            io_block: AtomicBool::new(false),
            vfork: Mutex::new(None),
            parent: Mutex::new(parent_pid),
            children: Mutex::new(Vec::new()),
            exit_code: AtomicI32::new(0),
            zombie: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            wait_slot: WaitSlot::default(),
        });

        if let Some(ppid) = parent_pid {
            if let Some(p) = inner.tasks.get(&ppid) {
                p.children.lock().unwrap().push(pid);
            }
        }
        let sid = task.thread_group.sid.load(Ordering::Relaxed);
        let pgid = task.thread_group.pgid.load(Ordering::Relaxed);
        inner.sessions.entry(sid).or_default().push(tgid);
        inner.pgroups.entry(pgid).or_default().push(tgid);

        inner.tasks.insert(pid, task.clone());
        drop(inner);

        if opts.vfork {
            if let Some(p) = parent {
                let handoff = Arc::new(VforkHandoff::default());
                *task.vfork.lock().unwrap() = Some(handoff.clone());
                handoff.wait(p);
            }
        }

        Ok(task)
    }

    /// Must not be called while any other reference expects the task to
    /// remain visible to `pid_get_task`: blocks until `critical_region ==
    /// 0`, then removes the task from every list it is a member of. Also
    /// the release point for a vforking parent (this task exiting is this
    /// crate's only modeled vfork release, since `exec` is out of scope)
    /// and, if this task was its thread group's leader, for a parent
    /// blocked in [`ThreadGroup::wait_for_child_exit`].
    pub fn destroy(&self, pid: u32) -> LinuxResult<()> {
        let task = {
            let inner = self.inner.lock().unwrap();
            inner
                .tasks
                .get(&pid)
                .cloned()
                .ok_or(LinuxError::ESRCH)?
        };
        task.wait_for_critical_region_zero();
        self.vfork_notify(&task);

        let mut inner = self.inner.lock().unwrap();
        let ppid = *task.parent.lock().unwrap();
        if let Some(ppid) = ppid {
            if let Some(p) = inner.tasks.get(&ppid) {
                p.children.lock().unwrap().retain(|&c| c != pid);
            }
        }
        task.thread_group.members.lock().unwrap().retain(|&m| m != pid);

        let sid = task.thread_group.sid.load(Ordering::Relaxed);
        let pgid = task.thread_group.pgid.load(Ordering::Relaxed);
        if let Some(list) = inner.sessions.get_mut(&sid) {
            list.retain(|&t| t != task.tgid || task.thread_group.member_count() > 0);
            if list.is_empty() {
                inner.sessions.remove(&sid);
            }
        }
        if let Some(list) = inner.pgroups.get_mut(&pgid) {
            list.retain(|&t| t != task.tgid || task.thread_group.member_count() > 0);
            if list.is_empty() {
                inner.pgroups.remove(&pgid);
            }
        }

        if task.is_leader() {
            if let Some(ppid) = ppid {
                if let Some(p) = inner.tasks.get(&ppid) {
                    p.thread_group.notify_child_exit();
                }
            }
        }

        inner.tasks.remove(&pid);
        Ok(())
    }

    /// True if a pid record exists (alive or zombie).
    pub fn pid_get(&self, id: u32) -> bool {
        self.inner.lock().unwrap().tasks.contains_key(&id)
    }

    /// `None` for a zombie or nonexistent pid.
    pub fn pid_get_task(&self, id: u32) -> Option<Arc<Task>> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .get(&id)
            .filter(|t| !t.zombie.load(Ordering::Acquire))
            .cloned()
    }

    /// Like [`Self::pid_get_task`] but also returns zombies.
    pub fn pid_get_task_including_zombies(&self, id: u32) -> Option<Arc<Task>> {
        self.inner.lock().unwrap().tasks.get(&id).cloned()
    }

    /// Used by `/proc/loadavg`.
    pub fn last_allocated_pid(&self) -> u32 {
        self.inner.lock().unwrap().last_allocated
    }

    /// Non-zombie task count.
    pub fn count_alive(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| !t.zombie.load(Ordering::Acquire))
            .count()
    }

    /// Non-zombie tasks with `io_block` set.
    pub fn count_blocked(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| !t.zombie.load(Ordering::Acquire) && t.io_block.load(Ordering::Acquire))
            .count()
    }

    /// Snapshot of every live (non-zombie) task, for the proc projection's
    /// `readdir`.
    pub fn alive_pids_sorted(&self) -> Vec<u32> {
        let inner = self.inner.lock().unwrap();
        let mut pids: Vec<u32> = inner
            .tasks
            .iter()
            .filter(|(_, t)| !t.zombie.load(Ordering::Acquire))
            .map(|(&pid, _)| pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// The smallest alive pid strictly greater than `after`, or `None`.
    pub fn next_alive_pid_after(&self, after: u32) -> Option<u32> {
        self.alive_pids_sorted().into_iter().find(|&p| p > after)
    }

    /// `setsid(task)`: the task becomes session and process-group leader
    /// of a brand new session. Fails with `EPERM` if the task is already
    /// a process-group leader.
    pub fn setsid(&self, task: &Arc<Task>) -> LinuxResult<u32> {
        let mut inner = self.inner.lock().unwrap();
        let tg = &task.thread_group;
        let old_pgid = tg.pgid.load(Ordering::Relaxed);
        if old_pgid == tg.leader_pid {
            return Err(LinuxError::EPERM);
        }
        let old_sid = tg.sid.load(Ordering::Relaxed);
        if let Some(list) = inner.sessions.get_mut(&old_sid) {
            list.retain(|&t| t != tg.leader_pid);
        }
        if let Some(list) = inner.pgroups.get_mut(&old_pgid) {
            list.retain(|&t| t != tg.leader_pid);
        }
        let new_id = tg.leader_pid;
        tg.sid.store(new_id, Ordering::Relaxed);
        tg.pgid.store(new_id, Ordering::Relaxed);
        inner.sessions.entry(new_id).or_default().push(new_id);
        inner.pgroups.entry(new_id).or_default().push(new_id);
        Ok(new_id)
    }

    /// `leave_session(task)`: detaches the task's group from its
    /// controlling terminal without changing session/pgroup ids.
    pub fn leave_session(&self, task: &Arc<Task>) {
        *task.thread_group.tty.lock().unwrap() = None;
    }

    /// Resumes a vfork-waiting parent, if `task` has a handoff recorded.
    pub fn vfork_notify(&self, task: &Arc<Task>) {
        if let Some(handoff) = task.vfork.lock().unwrap().take() {
            handoff.notify_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use proptest::prelude::*;

    use super::*;
    use crate::mm::MemorySpace;

    struct DummySpace;
    impl MemorySpace for DummySpace {
        fn read_u32(&self, _addr: memory_addr::VirtAddr) -> Option<u32> {
            Some(0)
        }
        fn write_u32(&self, _addr: memory_addr::VirtAddr, _value: u32) -> bool {
            true
        }
    }

    fn dummy_mm() -> MemorySpaceHandle {
        Arc::new(DummySpace)
    }

    #[test]
    fn create_assigns_pid_one_to_first_task() {
        let tasks = TaskTable::new();
        let init = tasks.create(None, dummy_mm(), CreateOpts::default()).unwrap();
        assert_eq!(init.pid, 1);
        assert!(init.is_leader());
    }

    #[test]
    fn destroy_removes_from_parent_children() {
        let tasks = TaskTable::new();
        let init = tasks.create(None, dummy_mm(), CreateOpts::default()).unwrap();
        let child = tasks.create(Some(&init), dummy_mm(), CreateOpts::default()).unwrap();
        assert_eq!(init.child_pids(), vec![child.pid]);
        tasks.destroy(child.pid).unwrap();
        assert!(init.child_pids().is_empty());
    }

    #[test]
    fn vfork_create_blocks_parent_until_child_exits() {
        let tasks = Arc::new(TaskTable::new());
        let init = tasks.create(None, dummy_mm(), CreateOpts::default()).unwrap();

        let t_tasks = tasks.clone();
        let t_init = init.clone();
        let vforker = thread::spawn(move || {
            t_tasks.create(
                Some(&t_init),
                dummy_mm(),
                CreateOpts { new_thread_group: true, vfork: true, ..Default::default() },
            )
        });

        // give the vfork child time to be created and recorded, then
        // "exit" it — the parent's blocked `create` call should return.
        thread::sleep(Duration::from_millis(20));
        let child_pid = init.child_pids()[0];
        assert!(init.io_block.load(Ordering::Acquire));
        tasks.destroy(child_pid).unwrap();

        let child = vforker.join().unwrap().unwrap();
        assert_eq!(child.pid, child_pid);
        assert!(!init.io_block.load(Ordering::Acquire));
    }

    #[test]
    fn child_process_exit_wakes_parent_wait_for_child_exit() {
        let tasks = Arc::new(TaskTable::new());
        let init = tasks.create(None, dummy_mm(), CreateOpts::default()).unwrap();
        let child = tasks
            .create(Some(&init), dummy_mm(), CreateOpts { new_thread_group: true, ..Default::default() })
            .unwrap();

        let t_init = init.clone();
        let waiter = thread::spawn(move || t_init.thread_group.wait_for_child_exit(&t_init, None));

        thread::sleep(Duration::from_millis(20));
        tasks.destroy(child.pid).unwrap();

        assert!(waiter.join().unwrap().is_ok());
    }

    proptest! {
        /// Pid uniqueness: no two tasks alive at once in the same table
        /// ever share a pid, across an arbitrary number of creates.
        #[test]
        fn pids_are_unique_across_many_creates(n in 1usize..200) {
            let tasks = TaskTable::new();
            let init = tasks.create(None, dummy_mm(), CreateOpts::default()).unwrap();
            let mut pids = std::collections::HashSet::new();
            pids.insert(init.pid);
            for _ in 0..n {
                let child = tasks.create(Some(&init), dummy_mm(), CreateOpts::default()).unwrap();
                prop_assert!(pids.insert(child.pid), "pid {} reused", child.pid);
            }
        }
    }
}

//! Session and process-group views over the task table.
//!
//! `TaskTable` itself owns the session/pgroup id maps and the mutating
//! operations (`setsid`, `leave_session`) — this module is the read-only
//! view job-control code (tty line discipline, `ioctl(TIOCSPGRP)`) wants
//! without reaching into `TaskTable`'s internals directly.

use crate::task::TaskTable;

/// A session: the set of thread-group leader pids sharing a session id.
pub struct Session {
    pub id: u32,
}

impl Session {
    pub fn new(id: u32) -> Self {
        Self { id }
    }
}

/// A process group: the set of thread-group leader pids sharing a pgid.
pub struct ProcessGroup {
    pub id: u32,
}

impl ProcessGroup {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    /// True if `tgid` is the foreground group for some controlling
    /// terminal — a job-control question this crate answers structurally
    /// (by pgid equality) and leaves tty ownership itself to the VFS
    /// collaborator.
    pub fn is_leader(&self, tgid: u32) -> bool {
        self.id == tgid
    }
}

/// Looks up the session a task's thread group currently belongs to, via
/// its leader's `sid` (no direct table scan needed — the id is already
/// cached on `ThreadGroup`).
pub fn session_of(tasks: &TaskTable, pid: u32) -> Option<Session> {
    tasks.pid_get_task(pid).map(|t| Session::new(t.thread_group.sid.load(std::sync::atomic::Ordering::Relaxed)))
}

/// Looks up the process group a task's thread group currently belongs to.
pub fn process_group_of(tasks: &TaskTable, pid: u32) -> Option<ProcessGroup> {
    tasks.pid_get_task(pid).map(|t| ProcessGroup::new(t.thread_group.pgid.load(std::sync::atomic::Ordering::Relaxed)))
}

use std::fmt;

use super::Task;

/// Represents `/proc/[pid]/stat`. See
/// <https://man7.org/linux/man-pages/man5/proc_pid_stat.5.html>.
#[allow(missing_docs)]
#[derive(Default)]
pub struct TaskStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub pgrp: u32,
    pub session: u32,
    pub tty_nr: u32,
    pub tpgid: i32,
    pub flags: u32,
    pub minflt: u64,
    pub cminflt: u64,
    pub majflt: u64,
    pub cmajflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: u32,
    pub itrealvalue: u64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss: i64,
    pub rsslim: u64,
    pub start_code: u64,
    pub end_code: u64,
    pub start_stack: u64,
    pub kstk_esp: u64,
    pub kstk_eip: u64,
    pub signal: u64,
    pub blocked: u64,
    pub sigignore: u64,
    pub sigcatch: u64,
    pub wchan: u64,
    pub nswap: u64,
    pub cnswap: u64,
    pub exit_signal: i32,
    pub processor: u32,
    pub rt_priority: u32,
    pub policy: u32,
    pub delayacct_blkio_ticks: u64,
    pub guest_time: u64,
    pub cguest_time: i64,
    pub exit_code: i32,
}

impl TaskStat {
    /// Builds a `TaskStat` from the live task's currently-visible fields.
    /// Fields the core has no real data for (page faults, stack/code
    /// ranges, scheduler priority) stay at their zero defaults — the same
    /// placeholder convention `/proc/meminfo` uses.
    pub fn from_task(task: &Task) -> Self {
        let state = if task.zombie.load(std::sync::atomic::Ordering::Acquire) {
            'Z'
        } else if task.io_block.load(std::sync::atomic::Ordering::Acquire) {
            'D'
        } else {
            'R'
        };
        Self {
            pid: task.pid,
            comm: task.comm.lock().unwrap().clone(),
            state,
            ppid: task.parent_pid().unwrap_or(0),
            pgrp: task.thread_group.pgid.load(std::sync::atomic::Ordering::Relaxed),
            session: task.thread_group.sid.load(std::sync::atomic::Ordering::Relaxed),
            num_threads: task.thread_group.member_count() as u32,
            exit_code: task.exit_code.load(std::sync::atomic::Ordering::Acquire),
            ..Default::default()
        }
    }
}

impl fmt::Display for TaskStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            pid,
            comm,
            state,
            ppid,
            pgrp,
            session,
            tty_nr,
            tpgid,
            flags,
            minflt,
            cminflt,
            majflt,
            cmajflt,
            utime,
            stime,
            cutime,
            cstime,
            priority,
            nice,
            num_threads,
            itrealvalue,
            starttime,
            vsize,
            rss,
            rsslim,
            start_code,
            end_code,
            start_stack,
            kstk_esp,
            kstk_eip,
            signal,
            blocked,
            sigignore,
            sigcatch,
            wchan,
            nswap,
            cnswap,
            exit_signal,
            processor,
            rt_priority,
            policy,
            delayacct_blkio_ticks,
            guest_time,
            cguest_time,
            exit_code,
        } = self;
        writeln!(
            f,
            "{pid} ({comm}) {state} {ppid} {pgrp} {session} {tty_nr} {tpgid} {flags} {minflt} {cminflt} {majflt} {cmajflt} {utime} {stime} {cutime} {cstime} {priority} {nice} {num_threads} {itrealvalue} {starttime} {vsize} {rss} {rsslim} {start_code} {end_code} {start_stack} {kstk_esp} {kstk_eip} {signal} {blocked} {sigignore} {sigcatch} {wchan} {nswap} {cnswap} {exit_signal} {processor} {rt_priority} {policy} {delayacct_blkio_ticks} {guest_time} {cguest_time} 0 0 0 0 0 0 0 0 {exit_code}",
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::Ordering,
    };

    use super::*;
    use crate::{mm::MemorySpace, task::{CreateOpts, TaskTable}};

    struct DummySpace;
    impl MemorySpace for DummySpace {
        fn read_u32(&self, _addr: memory_addr::VirtAddr) -> Option<u32> {
            Some(0)
        }

        fn write_u32(&self, _addr: memory_addr::VirtAddr, _value: u32) -> bool {
            true
        }
    }

    #[test]
    fn display_has_51_fields() {
        let table = TaskTable::new();
        let mm: Arc<dyn MemorySpace> = Arc::new(DummySpace);
        let task = table.create(None, mm, CreateOpts::default()).unwrap();
        task.set_comm("init");
        let stat = TaskStat::from_task(&task);
        let text = stat.to_string();
        let fields: Vec<&str> = text.trim_end().splitn(2, ' ').collect();
        assert_eq!(fields[0], "1");
        assert!(text.contains("(init)"));
        assert_eq!(stat.state, 'R');
    }

    #[test]
    fn zombie_state_is_z() {
        let table = TaskTable::new();
        let mm: Arc<dyn MemorySpace> = Arc::new(DummySpace);
        let task = table.create(None, mm, CreateOpts::default()).unwrap();
        task.zombie.store(true, Ordering::Release);
        assert_eq!(TaskStat::from_task(&task).state, 'Z');
    }
}

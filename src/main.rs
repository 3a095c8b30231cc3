//! Demonstration binary: wires a reference `MemorySpace`/`CpuInfo`/
//! `Telemetry`/`Vfs` together, boots a pid-1 task, and drives a handful of
//! concrete end-to-end scenarios as a smoke test.

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use memory_addr::VirtAddr;
use vkernel_api::demo::{DemoTelemetry, DemoVfs, FixedCpuInfo, FlatMemorySpace};
use vkernel_core::{
    futex::FutexKey,
    mm::MemorySpace,
    procfs::{ProcRoot, ReaddirCursor, ReaddirEntry},
    task::{CreateOpts, TaskTable},
};

fn futex_ping_pong(tasks: &Arc<TaskTable>, mm: Arc<FlatMemorySpace>) {
    let space: Arc<dyn vkernel_core::mm::MemorySpace> = mm.clone();
    let table = Arc::new(vkernel_core::futex::FutexTable::new());
    let barrier = Arc::new(Barrier::new(2));
    let waiting_task = tasks.create(Some(&tasks.pid_get_task(1).unwrap()), mm.clone(), CreateOpts::default()).unwrap();

    mm.write_u32(VirtAddr::from_usize(0), 1);

    let t_table = table.clone();
    let t_space = space.clone();
    let t_barrier = barrier.clone();
    let t_task = waiting_task.clone();
    let waiter = thread::spawn(move || {
        let key = FutexKey::new(t_space, VirtAddr::from_usize(0));
        t_barrier.wait();
        t_table.wait(&t_task, &key, 1, u32::MAX, None)
    });

    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    mm.write_u32(VirtAddr::from_usize(0), 2);
    let woken = table.wake(&FutexKey::new(space, VirtAddr::from_usize(0)), 1, None);
    let result = waiter.join().unwrap();
    log::info!("futex ping-pong: wake returned {woken}, waiter result {result:?}");
    assert_eq!(woken, 1);
    assert!(result.is_ok());
    tasks.destroy(waiting_task.pid).unwrap();
}

fn futex_requeue(tasks: &Arc<TaskTable>, mm: Arc<FlatMemorySpace>) {
    let space: Arc<dyn vkernel_core::mm::MemorySpace> = mm.clone();
    let table = Arc::new(vkernel_core::futex::FutexTable::new());
    let barrier = Arc::new(Barrier::new(6));
    let mut handles = Vec::new();
    let mut waiter_pids = Vec::new();
    for _ in 0..5 {
        let t_table = table.clone();
        let t_space = space.clone();
        let t_barrier = barrier.clone();
        let t_task = tasks.create(Some(&tasks.pid_get_task(1).unwrap()), mm.clone(), CreateOpts::default()).unwrap();
        waiter_pids.push(t_task.pid);
        handles.push(thread::spawn(move || {
            let key = FutexKey::new(t_space, VirtAddr::from_usize(0));
            t_barrier.wait();
            t_table.wait(&t_task, &key, 0, u32::MAX, None)
        }));
    }
    barrier.wait();
    thread::sleep(Duration::from_millis(30));

    let total = table.requeue(
        &FutexKey::new(space.clone(), VirtAddr::from_usize(0)),
        2,
        10,
        &FutexKey::new(space.clone(), VirtAddr::from_usize(4)),
    );
    log::info!("futex requeue: total {total}");
    assert_eq!(total, 5);

    let remaining_woken = table.wake(&FutexKey::new(space, VirtAddr::from_usize(4)), 10, None);
    assert_eq!(remaining_woken, 3);

    for h in handles {
        assert!(h.join().unwrap().is_ok());
    }
    for pid in waiter_pids {
        tasks.destroy(pid).unwrap();
    }
}

fn futex_compare_fail(tasks: &Arc<TaskTable>, mm: Arc<FlatMemorySpace>) {
    let space: Arc<dyn vkernel_core::mm::MemorySpace> = mm.clone();
    space.write_u32(VirtAddr::from_usize(0), 7);
    let table = vkernel_core::futex::FutexTable::new();
    let task = tasks.create(Some(&tasks.pid_get_task(1).unwrap()), mm, CreateOpts::default()).unwrap();
    let err = table
        .wait(&task, &FutexKey::new(space, VirtAddr::from_usize(0)), 3, u32::MAX, None)
        .unwrap_err();
    log::info!("futex compare-fail: {err:?}");
    assert_eq!(err, axerrno::LinuxError::EAGAIN);
    tasks.destroy(task.pid).unwrap();
}

fn proc_self_symlink(tasks: &Arc<TaskTable>, cpu: Arc<dyn vkernel_core::collab::CpuInfo>, telemetry: Arc<dyn vkernel_core::collab::Telemetry>, vfs: Arc<dyn vkernel_core::collab::Vfs>) {
    let root = ProcRoot::new(tasks.clone(), cpu, telemetry, vfs, 42);
    let node = root.lookup_static("self").unwrap();
    let target = root.readlink(node).unwrap();
    log::info!("proc self symlink: {target}");
    assert_eq!(target, "42/");
}

fn proc_mounts_escaping(tasks: &Arc<TaskTable>, cpu: Arc<dyn vkernel_core::collab::CpuInfo>, telemetry: Arc<dyn vkernel_core::collab::Telemetry>) {
    struct OddVfs;
    impl vkernel_core::collab::Vfs for OddVfs {
        fn filesystems(&self) -> String {
            String::new()
        }
        fn mounts(&self) -> Vec<vkernel_core::collab::MountEntry> {
            vec![vkernel_core::collab::MountEntry {
                source: "/a b\tc\\d".to_string(),
                point: String::new(),
                fstype: "fs".to_string(),
                read_only: false,
                no_suid: false,
                no_dev: false,
                no_exec: false,
                info: String::new(),
            }]
        }
    }
    let root = ProcRoot::new(tasks.clone(), cpu, telemetry, Arc::new(OddVfs), 1);
    let node = root.lookup_static("mounts").unwrap();
    let text = root.show(node).unwrap();
    log::info!("proc mounts escaping: {text:?}");
    assert_eq!(text, "/a\\040b\\011c\\134d / fs rw 0 0\n");
}

fn proc_pid_stat_reflects_init(tasks: &Arc<TaskTable>, cpu: Arc<dyn vkernel_core::collab::CpuInfo>, telemetry: Arc<dyn vkernel_core::collab::Telemetry>, vfs: Arc<dyn vkernel_core::collab::Vfs>) {
    let root = ProcRoot::new(tasks.clone(), cpu, telemetry, vfs, 1);
    let node = root.lookup_pid(1).unwrap();
    assert!(matches!(node, vkernel_core::procfs::ProcNode::DynamicPidDir));
    let stat = root.show_pid_file(1, "stat").unwrap();
    log::info!("/proc/1/stat: {stat}");
    assert!(stat.starts_with("1 (init) R"));
}

fn proc_readdir_lists_static_then_pids(tasks: &Arc<TaskTable>, cpu: Arc<dyn vkernel_core::collab::CpuInfo>, telemetry: Arc<dyn vkernel_core::collab::Telemetry>, vfs: Arc<dyn vkernel_core::collab::Vfs>) {
    let root = ProcRoot::new(tasks.clone(), cpu, telemetry, vfs, 1);
    let mut cursor = ReaddirCursor(0);
    let mut names = Vec::new();
    while let Some((entry, next)) = root.readdir(cursor) {
        match entry {
            ReaddirEntry::Static(name) => names.push(name.to_string()),
            ReaddirEntry::Pid(pid) => names.push(format!("pid:{pid}")),
        }
        cursor = next;
    }
    log::info!("proc readdir: {names:?}");
}

fn main() {
    env_logger::init();

    let tasks = Arc::new(TaskTable::new());
    let init_mm: Arc<dyn vkernel_core::mm::MemorySpace> = Arc::new(FlatMemorySpace::new(256));
    let init = tasks.create(None, init_mm, CreateOpts::default()).expect("pid 1");
    init.set_comm("init");
    log::info!("booted {} as pid {}", init.host_thread_label(), init.pid);

    let cpu: Arc<dyn vkernel_core::collab::CpuInfo> = Arc::new(FixedCpuInfo);
    let telemetry: Arc<dyn vkernel_core::collab::Telemetry> = Arc::new(DemoTelemetry::new(4));
    let vfs: Arc<dyn vkernel_core::collab::Vfs> = Arc::new(DemoVfs::default());

    let root = ProcRoot::new(tasks.clone(), cpu.clone(), telemetry.clone(), vfs.clone(), init.pid);
    let cpuinfo_node = root.lookup_static("cpuinfo").unwrap();
    log::info!("/proc/cpuinfo:\n{}", root.show(cpuinfo_node).unwrap());

    futex_ping_pong(&tasks, Arc::new(FlatMemorySpace::new(8)));
    futex_requeue(&tasks, Arc::new(FlatMemorySpace::new(8)));
    futex_compare_fail(&tasks, Arc::new(FlatMemorySpace::new(8)));

    proc_self_symlink(&tasks, cpu.clone(), telemetry.clone(), vfs.clone());
    proc_mounts_escaping(&tasks, cpu.clone(), telemetry.clone());
    proc_pid_stat_reflects_init(&tasks, cpu.clone(), telemetry.clone(), vfs.clone());
    proc_readdir_lists_static_then_pids(&tasks, cpu, telemetry, vfs);

    log::info!("all scenarios passed");
}

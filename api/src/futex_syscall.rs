//! `sys_futex` and the robust-list syscalls.

use std::sync::{Arc, atomic::Ordering};

use axerrno::{LinuxError, LinuxResult};
use linux_raw_sys::general::{
    FUTEX_CMD_MASK, FUTEX_CMP_REQUEUE, FUTEX_REQUEUE, FUTEX_WAIT, FUTEX_WAIT_BITSET, FUTEX_WAKE,
    FUTEX_WAKE_BITSET,
};
use memory_addr::VirtAddr;
use vkernel_core::{
    config::ROBUST_LIST_LIMIT,
    futex::FutexKey,
    mm::MemorySpace,
    task::Task,
};

use crate::{
    mm::{RobustListHead, TimeSpec, UserConstPtr, UserPtr, ROBUST_LIST_HEAD_SIZE},
    nullable,
};

/// `sys_futex(uaddr, futex_op, val, timeout, uaddr2, val3)`.
///
/// `futex_op` is masked with `FUTEX_CMD_MASK` before dispatch, discarding
/// `FUTEX_PRIVATE_FLAG` (this table is already private to one address
/// space) and `FUTEX_CLOCK_REALTIME` (timeouts are always measured against
/// the monotonic host clock — see DESIGN.md's Open Question on this).
pub fn sys_futex(
    task: &Arc<Task>,
    uaddr: UserConstPtr<u32>,
    futex_op: u32,
    value: u32,
    timeout: UserConstPtr<TimeSpec>,
    uaddr2: UserPtr<u32>,
    value3: u32,
) -> LinuxResult<isize> {
    let futex_table = &task.thread_group.futex_table;
    let space = task.mm.clone();
    let command = futex_op & FUTEX_CMD_MASK;

    match command {
        FUTEX_WAIT | FUTEX_WAIT_BITSET => {
            let bitset = if command == FUTEX_WAIT_BITSET { value3 } else { u32::MAX };
            let duration = nullable!(timeout, timeout.read(space.as_ref()).and_then(|t| t.to_duration()))?;
            let key = FutexKey::new(space, uaddr.address());
            futex_table.wait(task, &key, value, bitset, duration)?;
            Ok(0)
        }
        FUTEX_WAKE | FUTEX_WAKE_BITSET => {
            let mask = if command == FUTEX_WAKE_BITSET { Some(value3) } else { None };
            let key = FutexKey::new(space, uaddr.address());
            Ok(futex_table.wake(&key, value, mask) as isize)
        }
        FUTEX_REQUEUE | FUTEX_CMP_REQUEUE => {
            if command == FUTEX_CMP_REQUEUE {
                let current = space.read_u32(uaddr.address()).ok_or(LinuxError::EFAULT)?;
                if current != value3 {
                    return Err(LinuxError::EAGAIN);
                }
            }
            let key = FutexKey::new(space.clone(), uaddr.address());
            let key2 = FutexKey::new(space, uaddr2.address());
            Ok(futex_table.requeue(&key, value, timeout.address().as_usize() as u32, &key2) as isize)
        }
        _ => Err(LinuxError::ENOSYS),
    }
}

/// `sys_set_robust_list(head, len)`. Only records the pointer; the actual
/// walk happens at task exit via [`exit_robust_list`].
pub fn sys_set_robust_list(task: &Arc<Task>, head: UserConstPtr<RobustListHead>, len: usize) -> LinuxResult<isize> {
    if len != ROBUST_LIST_HEAD_SIZE {
        return Err(LinuxError::EINVAL);
    }
    task.robust_list.store(head.address().as_usize(), Ordering::SeqCst);
    Ok(0)
}

/// `sys_get_robust_list(pid, head_out, len_out)`. `pid != 0` is restricted
/// to the caller's own pid — cross-task introspection is not supported
/// without a credentials check this crate has no way to perform.
pub fn sys_get_robust_list(
    task: &Arc<Task>,
    pid: u32,
    head_out: UserPtr<u32>,
    len_out: UserPtr<usize>,
) -> LinuxResult<isize> {
    if pid != 0 && pid != task.pid {
        return Err(LinuxError::EPERM);
    }
    let addr = task.robust_list.load(Ordering::SeqCst);
    let space = &task.mm;
    head_out.write(space.as_ref(), addr as u32)?;
    len_out.write(space.as_ref(), ROBUST_LIST_HEAD_SIZE)?;
    Ok(0)
}

/// Marks the futex at `entry + offset` owner-dead and wakes one waiter.
fn handle_futex_death(task: &Arc<Task>, entry: usize, offset: i64) -> LinuxResult<()> {
    let address = (entry as i64)
        .checked_add(offset)
        .ok_or(LinuxError::EINVAL)?;
    if address < 0 {
        return Err(LinuxError::EINVAL);
    }
    let key = FutexKey::new(task.mm.clone(), VirtAddr::from_usize(address as usize));
    task.thread_group.futex_table.mark_owner_dead(&key);
    Ok(())
}

/// Walks the robust list recorded on `task` at thread exit, marking every
/// held futex's owner dead and waking one waiter each, stopping at the
/// pending-lock entry (it was never actually acquired) or after
/// [`ROBUST_LIST_LIMIT`] steps.
pub fn exit_robust_list(task: &Arc<Task>) -> LinuxResult<()> {
    let head_addr = task.robust_list.load(Ordering::SeqCst);
    if head_addr == 0 {
        return Ok(());
    }
    let space = &task.mm;
    let head = UserConstPtr::<RobustListHead>::new(VirtAddr::from_usize(head_addr)).read(space.as_ref())?;

    let list_head = head_addr;
    let offset = head.offset as i64;
    let pending = head.list_op_pending as usize;

    let mut entry = head.list as usize;
    let mut limit = ROBUST_LIST_LIMIT;
    while entry != list_head {
        let next = space
            .read_u32(VirtAddr::from_usize(entry))
            .ok_or(LinuxError::EFAULT)? as usize;
        if entry != pending {
            handle_futex_death(task, entry, offset)?;
        }
        entry = next;

        limit -= 1;
        if limit == 0 {
            return Err(LinuxError::ELOOP);
        }
    }
    Ok(())
}

//! User-level threads: create, yield, exit, kill, join, sleep, wake.
//!
//! Many logical threads are multiplexed onto the single kernel thread that
//! calls [`init`]. Scheduling is strict FIFO, cooperative by default, and
//! preemptive once [`crate::interrupts::init`] arms the timer signal.
//!
//! Every operation here follows the same critical-section discipline:
//! capture the prior interrupt state, disable interrupts, mutate scheduler
//! state, and restore the *prior* state before returning. Operations that
//! give up the CPU restore interrupts only after the switch has returned in
//! the resumed thread's frame, so the caller's visible mask state is
//! unchanged no matter how many threads ran in between. The thread stub is
//! the one place that enables interrupts unconditionally: a freshly
//! dispatched thread starts with interrupts on even though it materialized
//! out of a masked context switch.

pub mod context;
pub mod queue;
pub mod scheduler;
pub mod stack;
pub mod tcb;

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::arch::x86_64::context_switch::{switch_context, switch_to_context};
use crate::error::ThreadError;
use crate::interrupts;
use scheduler::{Scheduler, WaitTarget, SCHEDULER};

pub use stack::THREAD_STACK_SIZE;
pub use tcb::{Tid, MAX_THREADS};

/// Exit code recorded for a thread that was killed.
pub const EXIT_CODE_KILL: i32 = -999;

/// Process exit code used when the scheduler itself fails irrecoverably.
pub const EXIT_CODE_FATAL: i32 = -1;

/// A handle to a caller-created wait queue.
///
/// The queue storage lives inside the scheduler so it can be mutated under
/// the interrupt mask; the handle just names it, like a file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitQueue {
    id: u64,
}

/// Run `f` against the scheduler with interrupts masked, restoring the
/// prior mask state afterwards. Only for operations that do not switch.
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let restore = interrupts::disable();
    let result = f(&mut SCHEDULER.lock());
    interrupts::set(restore);
    result
}

/// Initialize the thread library.
///
/// The calling thread becomes thread 0, running on the host-provided
/// stack. Must be called before any other operation in this module.
pub fn init() -> Result<(), ThreadError> {
    let restore = interrupts::disable();
    SCHEDULER.lock().init();
    interrupts::set(restore);
    Ok(())
}

/// The identifier of the calling thread.
pub fn current() -> Tid {
    with_scheduler(|sched| sched.current_tid())
}

/// Create a new thread that runs `f`, appended at the tail of the ready
/// queue.
///
/// Fails with `SysThread` when all thread slots are in use and with
/// `SysMemory` when a stack cannot be allocated.
pub fn spawn<F>(f: F) -> Result<Tid, ThreadError>
where
    F: FnOnce() + Send + 'static,
{
    let restore = interrupts::disable();
    let mut sched = SCHEDULER.lock();
    sched.reap();

    let tid = match sched.lowest_empty_slot() {
        Some(tid) => tid,
        None => {
            drop(sched);
            interrupts::set(restore);
            return Err(ThreadError::SysThread);
        }
    };
    let stack = match stack::Stack::allocate() {
        Ok(stack) => stack,
        Err(err) => {
            drop(sched);
            interrupts::set(restore);
            return Err(err);
        }
    };
    sched.install_thread(tid, stack, Box::new(f), thread_stub as usize as u64);

    drop(sched);
    interrupts::set(restore);
    Ok(tid)
}

/// Suspend the calling thread and run the next ready thread; the caller is
/// rescheduled after all currently ready threads have run.
///
/// Returns the identifier of the thread that was dispatched in the
/// caller's place, or the caller's own identifier when no other thread was
/// ready.
pub fn yield_now() -> Tid {
    yield_impl(true)
}

fn yield_impl(reap: bool) -> Tid {
    let restore = interrupts::disable();
    let mut sched = SCHEDULER.lock();
    if reap {
        sched.reap();
    }

    let prev = sched.current_tid();
    let next = match sched.rotate_current() {
        Some(next) => next,
        None => {
            // Nothing else is ready; the caller keeps the CPU.
            drop(sched);
            interrupts::set(restore);
            return prev;
        }
    };

    let old_ctx = sched.context_ptr_mut(prev);
    let new_ctx = sched.context_ptr(next);
    drop(sched);
    unsafe { switch_context(old_ctx, new_ctx) };

    // Back in the original thread, possibly much later.
    interrupts::set(restore);
    next
}

/// Suspend the calling thread and run the ready thread `tid`.
///
/// Yielding to the calling thread itself succeeds immediately.
pub fn yield_to(tid: Tid) -> Result<Tid, ThreadError> {
    let restore = interrupts::disable();
    let mut sched = SCHEDULER.lock();
    sched.reap();

    if tid >= MAX_THREADS {
        drop(sched);
        interrupts::set(restore);
        return Err(ThreadError::InvalidTid);
    }
    let prev = sched.current_tid();
    if tid == prev {
        drop(sched);
        interrupts::set(restore);
        return Ok(tid);
    }
    if sched.tcb(tid).state != tcb::ThreadState::Ready {
        drop(sched);
        interrupts::set(restore);
        return Err(ThreadError::BadThread);
    }

    sched.switch_to_target(tid);
    let old_ctx = sched.context_ptr_mut(prev);
    let new_ctx = sched.context_ptr(tid);
    drop(sched);
    unsafe { switch_context(old_ctx, new_ctx) };

    interrupts::set(restore);
    Ok(tid)
}

/// Exit the calling thread with `exit_code`, waking any joiners.
///
/// When the caller is the last runnable thread the whole process exits
/// with `exit_code`. This function does not return.
pub fn exit(exit_code: i32) -> ! {
    let restore = interrupts::disable();
    let mut sched = SCHEDULER.lock();
    sched.finish_current(exit_code);

    let next = match sched.dispatch_next() {
        Some(next) => next,
        None => {
            drop(sched);
            interrupts::set(restore);
            log::debug!("exit: no runnable threads left, process exits {}", exit_code);
            std::process::exit(exit_code);
        }
    };

    // The exiting thread's stack stays allocated until a later reap; the
    // switch below still runs on it.
    let new_ctx = sched.context_ptr(next);
    drop(sched);
    unsafe { switch_to_context(new_ctx) };
    std::process::exit(EXIT_CODE_FATAL);
}

/// Kill the thread `tid`, which "exits" with code [`EXIT_CODE_KILL`].
///
/// A thread cannot kill itself (it must [`exit`]), and zombies or empty
/// slots are not valid targets.
pub fn kill(tid: Tid) -> Result<Tid, ThreadError> {
    with_scheduler(|sched| {
        if tid >= MAX_THREADS {
            return Err(ThreadError::InvalidTid);
        }
        if tid == sched.current_tid() {
            return Err(ThreadError::BadThread);
        }
        if !sched.tcb(tid).state.is_live() {
            return Err(ThreadError::SysThread);
        }
        sched.kill_target(tid);
        Ok(tid)
    })
}

/// Suspend the calling thread until the thread `tid` exits, then return
/// its exit code.
///
/// A thread that has already finished is not joinable: only threads that
/// are blocked in `join` at the moment of death observe the exit code.
pub fn join(tid: Tid) -> Result<i32, ThreadError> {
    let restore = interrupts::disable();
    {
        let sched = SCHEDULER.lock();
        if tid >= MAX_THREADS {
            drop(sched);
            interrupts::set(restore);
            return Err(ThreadError::InvalidTid);
        }
        if tid == sched.current_tid() {
            drop(sched);
            interrupts::set(restore);
            return Err(ThreadError::BadThread);
        }
        if !sched.tcb(tid).state.is_live() {
            drop(sched);
            interrupts::set(restore);
            return Err(ThreadError::SysThread);
        }
    }

    // Nested mask capture: sleep_on restores to "disabled", we restore the
    // caller's state at the end.
    let slept = sleep_on(WaitTarget::Join(tid));
    let result = match slept {
        Ok(_) => Ok(with_scheduler(|sched| sched.tcb(tid).exit_code)),
        Err(err) => Err(err),
    };
    interrupts::set(restore);
    result
}

/// Suspend the calling thread on `queue` and run the next ready thread.
///
/// Fails with `SysThread` when no other thread is runnable, since blocking
/// then would deadlock the process.
pub fn sleep(queue: WaitQueue) -> Result<Tid, ThreadError> {
    sleep_on(WaitTarget::User(queue.id))
}

fn sleep_on(target: WaitTarget) -> Result<Tid, ThreadError> {
    let restore = interrupts::disable();
    let mut sched = SCHEDULER.lock();
    sched.reap();

    let prev = sched.current_tid();
    let next = match sched.park_current(target) {
        Ok(next) => next,
        Err(err) => {
            drop(sched);
            interrupts::set(restore);
            return Err(err);
        }
    };

    let old_ctx = sched.context_ptr_mut(prev);
    let new_ctx = sched.context_ptr(next);
    drop(sched);
    unsafe { switch_context(old_ctx, new_ctx) };

    // Woken up by wake_next/wake_all (or a peer's exit, for join queues).
    interrupts::set(restore);
    Ok(next)
}

/// Wake the first thread on `queue`. Returns how many threads were woken
/// (0 or 1); the caller keeps running.
pub fn wake_next(queue: WaitQueue) -> usize {
    with_scheduler(|sched| sched.wake_next(WaitTarget::User(queue.id)))
}

/// Wake every thread on `queue` in FIFO order. Returns how many threads
/// were woken; threads that block on the queue during the call are not
/// counted.
pub fn wake_all(queue: WaitQueue) -> usize {
    with_scheduler(|sched| sched.wake_all(WaitTarget::User(queue.id)))
}

/// Create an empty wait queue.
pub fn wait_queue_create() -> WaitQueue {
    let id = with_scheduler(|sched| sched.create_user_queue());
    WaitQueue { id }
}

/// Destroy a wait queue. Fails with `Other` if the queue still has
/// sleeping threads on it (or the handle is stale).
pub fn wait_queue_destroy(queue: WaitQueue) -> Result<(), ThreadError> {
    with_scheduler(|sched| sched.destroy_user_queue(queue.id))
}

/// Busy-wait for at least `duration_us` microseconds.
pub fn spin(duration_us: u64) {
    let deadline = Instant::now() + Duration::from_micros(duration_us);
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Preemption entry point, called from the timer signal handler.
///
/// Skips the reaper: freeing stacks from the asynchronous path could land
/// inside a non-reentrant allocator call in the interrupted thread. Zombies
/// are collected at the next voluntary scheduler entry instead.
pub(crate) fn preempt() {
    if !scheduler::is_initialized() {
        return;
    }
    yield_impl(false);
}

/// The entry frame every newly dispatched thread first executes: enable
/// interrupts, run the entry closure, then exit so the thread never falls
/// off the bottom of its stack.
extern "C" fn thread_stub() -> ! {
    // Interrupts are still disabled here: we arrived via a masked context
    // switch. Take the closure out before enabling them.
    let entry = {
        let mut sched = SCHEDULER.lock();
        let tid = sched.current_tid();
        sched.tcb_mut(tid).entry.take()
    };
    interrupts::enable();

    if let Some(entry) = entry {
        if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
            log::error!("thread {} panicked, exiting with fatal code", current());
            exit(EXIT_CODE_FATAL);
        }
    }

    let exit_code = with_scheduler(|sched| sched.tcb(sched.current_tid()).exit_code);
    exit(exit_code);
}

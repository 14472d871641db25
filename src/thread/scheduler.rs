//! The scheduler core: TCB table, ready queue, and wait queues.
//!
//! All state lives in one process-wide [`Scheduler`] behind a spin mutex.
//! Every acquisition happens with the timer signal masked (see the public
//! operations in [`crate::thread`]), so the lock is never contended and in
//! particular is never held when the preemption signal is delivered.
//!
//! The methods here only mutate bookkeeping state; actually moving the CPU
//! between threads is done by the callers, which extract raw context
//! pointers while holding the lock and switch after releasing it.

use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeMap;

use spin::Mutex;

use super::context::CpuContext;
use super::queue::ThreadQueue;
use super::stack::Stack;
use super::tcb::{EntryFn, Tcb, ThreadState, Tid, MAX_THREADS};
use super::EXIT_CODE_KILL;
use crate::error::ThreadError;

/// Global scheduler instance.
pub static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Set once `init` has run; checked by the preemption entry point before it
/// touches the scheduler.
static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Which wait queue a blocking operation parks the caller on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// The per-thread queue of threads joining `tid`.
    Join(Tid),
    /// A caller-created wait queue.
    User(u64),
}

/// The thread table plus every scheduling queue.
pub struct Scheduler {
    /// All thread slots, indexed by tid. Sized to `MAX_THREADS` at init and
    /// never resized, so context pointers stay stable across the lock.
    table: Vec<Tcb>,
    /// Threads eligible to run, in dispatch order.
    ready: ThreadQueue,
    /// For each tid, the threads blocked joining it.
    join_queues: Vec<ThreadQueue>,
    /// Caller-created wait queues, by handle id.
    user_queues: BTreeMap<u64, ThreadQueue>,
    /// Next user queue handle to hand out.
    next_user_queue: u64,
    /// The one running thread.
    current: Tid,
    /// Whether `init` has run.
    initialized: bool,
}

impl Scheduler {
    /// Create an uninitialized scheduler (const for static initialization).
    pub const fn new() -> Self {
        Scheduler {
            table: Vec::new(),
            ready: ThreadQueue::new(),
            join_queues: Vec::new(),
            user_queues: BTreeMap::new(),
            next_user_queue: 0,
            current: 0,
            initialized: false,
        }
    }

    /// Reset the table and queues; the caller becomes thread 0, running on
    /// the host-provided stack.
    pub fn init(&mut self) {
        self.table.clear();
        for tid in 0..MAX_THREADS {
            self.table.push(Tcb::new(tid));
        }
        self.table[0].state = ThreadState::Running;

        // Pre-reserve the ready queue so the signal-driven yield path never
        // has to grow it.
        self.ready = ThreadQueue::with_capacity(MAX_THREADS);
        self.join_queues.clear();
        for _ in 0..MAX_THREADS {
            self.join_queues.push(ThreadQueue::new());
        }
        self.user_queues.clear();
        self.current = 0;
        self.initialized = true;
        INITIALIZED.store(true, Ordering::Release);

        log::debug!("scheduler: initialized, thread 0 running");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The currently running thread's identifier.
    pub fn current_tid(&self) -> Tid {
        self.current
    }

    pub fn tcb(&self, tid: Tid) -> &Tcb {
        &self.table[tid]
    }

    pub fn tcb_mut(&mut self, tid: Tid) -> &mut Tcb {
        &mut self.table[tid]
    }

    pub fn ready_is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn context_ptr(&self, tid: Tid) -> *const CpuContext {
        &self.table[tid].context
    }

    pub fn context_ptr_mut(&mut self, tid: Tid) -> *mut CpuContext {
        &mut self.table[tid].context
    }

    // =========================================================================
    // Slot lifecycle
    // =========================================================================

    /// Free the stacks of finished threads and recycle their slots. The
    /// running thread is never reaped: during `exit` it is still executing
    /// on the stack the slot owns.
    pub fn reap(&mut self) {
        for tid in 0..self.table.len() {
            if tid == self.current {
                continue;
            }
            let tcb = &mut self.table[tid];
            if tcb.state.is_zombie() {
                log::debug!("scheduler: reaping thread {}", tid);
                tcb.stack = None;
                tcb.entry = None;
                tcb.state = ThreadState::Empty;
            }
        }
    }

    /// The lowest-indexed empty slot, if any.
    pub fn lowest_empty_slot(&self) -> Option<Tid> {
        (0..self.table.len()).find(|&tid| self.table[tid].state == ThreadState::Empty)
    }

    /// Populate `tid` with a fresh thread and make it ready.
    pub fn install_thread(&mut self, tid: Tid, stack: Stack, entry: EntryFn, entry_point: u64) {
        let context = CpuContext::for_new_thread(stack.top(), entry_point);
        let tcb = &mut self.table[tid];
        tcb.state = ThreadState::Ready;
        tcb.context = context;
        tcb.stack = Some(stack);
        tcb.exit_code = 0;
        tcb.entry = Some(entry);
        self.ready.push_back(tid);

        log::debug!("scheduler: spawned thread {}", tid);
    }

    // =========================================================================
    // Dispatch transitions
    // =========================================================================

    /// Move the running thread to the back of the ready queue and dispatch
    /// the head. Returns the successor, or `None` when no other thread is
    /// ready and the caller simply keeps the CPU.
    pub fn rotate_current(&mut self) -> Option<Tid> {
        let next = self.ready.pop_front()?;
        let prev = self.current;
        self.table[prev].state = ThreadState::Ready;
        self.ready.push_back(prev);
        self.table[next].state = ThreadState::Running;
        self.current = next;
        log::trace!("scheduler: rotate {} -> {}", prev, next);
        Some(next)
    }

    /// Move the running thread to the back of the ready queue and dispatch
    /// the specific ready thread `tid`. The caller has validated the target.
    pub fn switch_to_target(&mut self, tid: Tid) {
        self.ready.remove(tid);
        let prev = self.current;
        self.table[prev].state = ThreadState::Ready;
        self.ready.push_back(prev);
        self.table[tid].state = ThreadState::Running;
        self.current = tid;
        log::trace!("scheduler: switch {} -> {}", prev, tid);
    }

    /// Block the running thread on the given wait queue and dispatch the
    /// head of the ready queue. Fails without changing any state when the
    /// wait queue does not exist or when nothing else is runnable (blocking
    /// then would deadlock the process).
    pub fn park_current(&mut self, target: WaitTarget) -> Result<Tid, ThreadError> {
        if !self.wait_queue_exists(target) {
            return Err(ThreadError::Other);
        }
        let next = match self.ready.pop_front() {
            Some(next) => next,
            None => return Err(ThreadError::SysThread),
        };
        let prev = self.current;
        self.table[prev].state = ThreadState::Blocked;
        let parked = self.push_waiter(target, prev);
        debug_assert!(parked, "wait queue vanished inside the critical section");
        self.table[next].state = ThreadState::Running;
        self.current = next;
        log::trace!("scheduler: park {} on {:?}, dispatch {}", prev, target, next);
        Ok(next)
    }

    /// Dispatch the head of the ready queue without requeueing the running
    /// thread. Used by `exit`, after the running thread became a zombie.
    pub fn dispatch_next(&mut self) -> Option<Tid> {
        let next = self.ready.pop_front()?;
        self.table[next].state = ThreadState::Running;
        self.current = next;
        Some(next)
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Turn the running thread into an `Exited` zombie: record the exit
    /// code, wake every joiner, scrub stale wait-queue membership, and reap
    /// other finished slots.
    pub fn finish_current(&mut self, exit_code: i32) {
        let tid = self.current;
        self.table[tid].exit_code = exit_code;
        self.table[tid].state = ThreadState::Exited;
        let woken = self.wake_all(WaitTarget::Join(tid));
        if woken > 0 {
            log::debug!("scheduler: thread {} exit woke {} joiner(s)", tid, woken);
        }
        self.remove_from_all_wait_queues(tid);
        self.reap();
        log::debug!("scheduler: thread {} exited with code {}", tid, exit_code);
    }

    /// Kill a live, non-running thread: mark it `Killed`, purge it from the
    /// ready queue and from every wait queue, and wake its joiners so they
    /// observe the exit. The caller has validated the target.
    pub fn kill_target(&mut self, tid: Tid) {
        let tcb = &mut self.table[tid];
        tcb.state = ThreadState::Killed;
        tcb.exit_code = EXIT_CODE_KILL;
        // The thread will never run; its entry closure can go now, the
        // stack goes at the next reap.
        tcb.entry = None;

        self.ready.remove(tid);
        self.remove_from_all_wait_queues(tid);
        let woken = self.wake_all(WaitTarget::Join(tid));
        log::debug!("scheduler: killed thread {}, woke {} joiner(s)", tid, woken);
    }

    /// Remove `tid` from the ready queue and every wait queue it might
    /// still appear in.
    fn remove_from_all_wait_queues(&mut self, tid: Tid) {
        for queue in self.join_queues.iter_mut() {
            queue.remove(tid);
        }
        for queue in self.user_queues.values_mut() {
            queue.remove(tid);
        }
    }

    // =========================================================================
    // Wait queues
    // =========================================================================

    fn wait_queue_exists(&self, target: WaitTarget) -> bool {
        match target {
            WaitTarget::Join(tid) => tid < self.join_queues.len(),
            WaitTarget::User(id) => self.user_queues.contains_key(&id),
        }
    }

    fn wait_queue_mut(&mut self, target: WaitTarget) -> Option<&mut ThreadQueue> {
        match target {
            WaitTarget::Join(tid) => self.join_queues.get_mut(tid),
            WaitTarget::User(id) => self.user_queues.get_mut(&id),
        }
    }

    fn push_waiter(&mut self, target: WaitTarget, tid: Tid) -> bool {
        match self.wait_queue_mut(target) {
            Some(queue) => {
                queue.push_back(tid);
                true
            }
            None => false,
        }
    }

    fn pop_waiter(&mut self, target: WaitTarget) -> Option<Tid> {
        self.wait_queue_mut(target)?.pop_front()
    }

    /// Wake the first thread on the queue. Returns the number woken (0 or 1).
    pub fn wake_next(&mut self, target: WaitTarget) -> usize {
        match self.pop_waiter(target) {
            Some(tid) => {
                self.make_ready(tid);
                1
            }
            None => 0,
        }
    }

    /// Wake every thread on the queue in FIFO order. Returns the count.
    pub fn wake_all(&mut self, target: WaitTarget) -> usize {
        let mut count = 0;
        while let Some(tid) = self.pop_waiter(target) {
            self.make_ready(tid);
            count += 1;
        }
        count
    }

    fn make_ready(&mut self, tid: Tid) {
        self.table[tid].state = ThreadState::Ready;
        self.ready.push_back(tid);
        log::trace!("scheduler: woke thread {}", tid);
    }

    /// Create a caller-owned wait queue, returning its handle id.
    pub fn create_user_queue(&mut self) -> u64 {
        let id = self.next_user_queue;
        self.next_user_queue += 1;
        self.user_queues.insert(id, ThreadQueue::new());
        id
    }

    /// Destroy a caller-owned wait queue. Fails if the queue still has
    /// members or the handle is stale.
    pub fn destroy_user_queue(&mut self, id: u64) -> Result<(), ThreadError> {
        let occupied = match self.user_queues.get(&id) {
            Some(queue) => !queue.is_empty(),
            None => return Err(ThreadError::Other),
        };
        if occupied {
            return Err(ThreadError::Other);
        }
        self.user_queues.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with_threads(count: usize) -> Scheduler {
        let mut sched = Scheduler::new();
        sched.init();
        for _ in 0..count {
            let tid = sched.lowest_empty_slot().expect("free slot");
            let stack = Stack::allocate().expect("stack");
            sched.install_thread(tid, stack, Box::new(|| {}), 0x1000);
        }
        sched
    }

    #[test]
    fn init_makes_slot_zero_the_runner() {
        let sched = scheduler_with_threads(0);
        assert_eq!(sched.current_tid(), 0);
        assert_eq!(sched.tcb(0).state, ThreadState::Running);
        assert!(sched.tcb(0).stack.is_none());
        assert!(sched.ready_is_empty());
        for tid in 1..MAX_THREADS {
            assert_eq!(sched.tcb(tid).state, ThreadState::Empty);
        }
    }

    #[test]
    fn slots_are_allocated_lowest_first() {
        let mut sched = scheduler_with_threads(3);
        assert_eq!(sched.tcb(1).state, ThreadState::Ready);
        assert_eq!(sched.tcb(3).state, ThreadState::Ready);
        assert_eq!(sched.lowest_empty_slot(), Some(4));

        // Finish thread 2 and reap; its slot is recycled before slot 4.
        sched.tcb_mut(2).state = ThreadState::Exited;
        sched.ready.remove(2);
        sched.reap();
        assert_eq!(sched.lowest_empty_slot(), Some(2));
    }

    #[test]
    fn rotate_with_empty_ready_queue_keeps_the_runner() {
        let mut sched = scheduler_with_threads(0);
        assert_eq!(sched.rotate_current(), None);
        assert_eq!(sched.current_tid(), 0);
        assert_eq!(sched.tcb(0).state, ThreadState::Running);
    }

    #[test]
    fn rotate_dispatches_fifo_and_requeues_the_runner() {
        let mut sched = scheduler_with_threads(2);
        assert_eq!(sched.rotate_current(), Some(1));
        assert_eq!(sched.current_tid(), 1);
        assert_eq!(sched.tcb(0).state, ThreadState::Ready);
        assert_eq!(sched.tcb(1).state, ThreadState::Running);

        // Queue order is now [2, 0].
        assert_eq!(sched.rotate_current(), Some(2));
        assert_eq!(sched.rotate_current(), Some(0));
    }

    #[test]
    fn park_refuses_when_nothing_else_is_runnable() {
        let mut sched = scheduler_with_threads(0);
        let queue = sched.create_user_queue();
        assert_eq!(
            sched.park_current(WaitTarget::User(queue)),
            Err(ThreadError::SysThread)
        );
        assert_eq!(sched.tcb(0).state, ThreadState::Running);
    }

    #[test]
    fn park_blocks_the_runner_and_dispatches() {
        let mut sched = scheduler_with_threads(1);
        let queue = sched.create_user_queue();
        assert_eq!(sched.park_current(WaitTarget::User(queue)), Ok(1));
        assert_eq!(sched.tcb(0).state, ThreadState::Blocked);
        assert_eq!(sched.current_tid(), 1);

        // Destroying a non-empty queue fails; waking empties it.
        assert_eq!(
            sched.destroy_user_queue(queue),
            Err(ThreadError::Other)
        );
        assert_eq!(sched.wake_next(WaitTarget::User(queue)), 1);
        assert_eq!(sched.tcb(0).state, ThreadState::Ready);
        assert_eq!(sched.destroy_user_queue(queue), Ok(()));
    }

    #[test]
    fn park_on_stale_queue_changes_nothing() {
        let mut sched = scheduler_with_threads(1);
        assert_eq!(
            sched.park_current(WaitTarget::User(99)),
            Err(ThreadError::Other)
        );
        assert_eq!(sched.tcb(0).state, ThreadState::Running);
        assert!(!sched.ready_is_empty());
    }

    #[test]
    fn finish_current_wakes_joiners_in_fifo_order() {
        let mut sched = scheduler_with_threads(3);
        // Threads 2 and 3 block joining thread 1.
        sched.switch_to_target(2);
        sched.park_current(WaitTarget::Join(1)).expect("park 2");
        sched.switch_to_target(3);
        sched.park_current(WaitTarget::Join(1)).expect("park 3");
        sched.switch_to_target(1);

        sched.finish_current(42);
        assert_eq!(sched.tcb(1).state, ThreadState::Exited);
        assert_eq!(sched.tcb(1).exit_code, 42);
        assert_eq!(sched.tcb(2).state, ThreadState::Ready);
        assert_eq!(sched.tcb(3).state, ThreadState::Ready);

        // The joiners resume in the order they joined, after the threads
        // that were already ready.
        let mut order = Vec::new();
        while let Some(tid) = sched.ready.pop_front() {
            order.push(tid);
        }
        assert_eq!(order.last(), Some(&3));
        let pos2 = order.iter().position(|&t| t == 2).expect("2 is ready");
        assert!(pos2 < order.len() - 1);
    }

    #[test]
    fn kill_purges_the_target_everywhere() {
        let mut sched = scheduler_with_threads(2);
        // Thread 1 blocks on a user queue; thread 2 stays ready.
        let queue = sched.create_user_queue();
        sched.switch_to_target(1);
        sched.park_current(WaitTarget::User(queue)).expect("park");

        sched.kill_target(1);
        assert_eq!(sched.tcb(1).state, ThreadState::Killed);
        assert_eq!(sched.tcb(1).exit_code, EXIT_CODE_KILL);
        assert_eq!(sched.destroy_user_queue(queue), Ok(()));

        // The zombie still owns its stack until a reap away from it.
        assert!(sched.tcb(1).stack.is_some());
        sched.reap();
        assert_eq!(sched.tcb(1).state, ThreadState::Empty);
        assert!(sched.tcb(1).stack.is_none());
    }

    #[test]
    fn reap_never_touches_the_runner() {
        let mut sched = scheduler_with_threads(1);
        sched.switch_to_target(1);
        sched.finish_current(0);
        // Thread 1 is a zombie but still current; reap must skip it.
        sched.reap();
        assert_eq!(sched.tcb(1).state, ThreadState::Exited);
        assert!(sched.tcb(1).stack.is_some());
    }

    #[test]
    fn wake_all_drains_in_fifo_order() {
        let mut sched = scheduler_with_threads(3);
        let queue = sched.create_user_queue();
        // Each park dispatches the next thread, which parks in turn; the
        // queue ends up holding 1, 2, 3 in that order and thread 0 runs.
        sched.switch_to_target(1);
        for _ in 0..3 {
            sched.park_current(WaitTarget::User(queue)).expect("park");
        }
        assert_eq!(sched.current_tid(), 0);
        assert_eq!(sched.wake_all(WaitTarget::User(queue)), 3);
        let mut woken = Vec::new();
        while let Some(tid) = sched.ready.pop_front() {
            if (1..=3).contains(&tid) {
                woken.push(tid);
            }
        }
        assert_eq!(woken, vec![1, 2, 3]);
    }

    #[test]
    fn wake_on_empty_or_stale_queue_is_zero() {
        let mut sched = scheduler_with_threads(0);
        let queue = sched.create_user_queue();
        assert_eq!(sched.wake_next(WaitTarget::User(queue)), 0);
        assert_eq!(sched.wake_all(WaitTarget::User(queue)), 0);
        assert_eq!(sched.wake_next(WaitTarget::User(1234)), 0);
    }
}

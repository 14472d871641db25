//! Thread control block (TCB).
//!
//! One TCB exists per thread slot, preallocated in the scheduler's table.
//! The TCB holds everything needed to manage a thread: its identifier, its
//! lifecycle state, its saved CPU context, and its stack.

use super::context::CpuContext;
use super::stack::Stack;

/// The maximum number of threads supported by the library.
pub const MAX_THREADS: usize = 256;

/// The identifier for a thread. Valid identifiers are less than
/// [`MAX_THREADS`]; an identifier is the index of the thread's slot in the
/// TCB table and is reused after the slot is reaped.
pub type Tid = usize;

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot is unused and may be handed out by `spawn`.
    Empty,
    /// Thread is ready to run and sits in the ready queue.
    Ready,
    /// Thread is currently executing on the CPU.
    Running,
    /// Thread is suspended on exactly one wait queue.
    Blocked,
    /// Thread called `exit`; its stack survives until the next reap.
    Exited,
    /// Thread was killed by a peer; its stack survives until the next reap.
    Killed,
}

impl ThreadState {
    /// A zombie has finished but still owns its stack.
    pub fn is_zombie(self) -> bool {
        matches!(self, ThreadState::Exited | ThreadState::Killed)
    }

    /// A live thread can still be scheduled, joined, or killed.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ThreadState::Ready | ThreadState::Running | ThreadState::Blocked
        )
    }
}

/// The entry closure a thread runs once it is first dispatched.
pub type EntryFn = Box<dyn FnOnce() + Send + 'static>;

/// Thread control block: complete per-thread state.
pub struct Tcb {
    /// This thread's identifier, equal to its table index.
    pub tid: Tid,

    /// Current lifecycle state.
    pub state: ThreadState,

    /// Saved CPU context, valid while the thread is suspended.
    pub context: CpuContext,

    /// The thread's stack. `None` for the bootstrap thread (slot 0), which
    /// runs on the host-provided stack, and for reaped slots.
    pub stack: Option<Stack>,

    /// Exit code, meaningful once the thread is a zombie.
    pub exit_code: i32,

    /// Entry closure, consumed by the thread stub on first dispatch.
    pub entry: Option<EntryFn>,
}

impl Tcb {
    /// Create an empty TCB for the given slot.
    pub fn new(tid: Tid) -> Self {
        Tcb {
            tid,
            state: ThreadState::Empty,
            context: CpuContext::new(),
            stack: None,
            exit_code: 0,
            entry: None,
        }
    }
}

impl core::fmt::Debug for Tcb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tcb")
            .field("tid", &self.tid)
            .field("state", &self.state)
            .field("exit_code", &self.exit_code)
            .field("has_stack", &self.stack.is_some())
            .finish()
    }
}

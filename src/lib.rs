//! # strand
//!
//! A user-level thread library: many logical threads multiplexed onto the
//! single kernel thread that calls [`init`], with machine-level context
//! switching and FIFO scheduling. A periodic timer signal (see
//! [`interrupts`]) delivers a simulated interrupt so the scheduler can
//! preempt a running thread; explicit yields and wait queues are available
//! for building higher-level synchronization.
//!
//! ```no_run
//! strand::init().expect("thread library");
//!
//! let child = strand::spawn(|| {
//!     println!("hello from thread {}", strand::current());
//! })
//! .expect("spawn");
//!
//! strand::yield_to(child).expect("yield");
//! ```
//!
//! Only x86-64 Unix hosts are supported.

pub mod arch;
pub mod error;
pub mod interrupts;
pub mod thread;

pub use error::ThreadError;
pub use thread::{
    current, exit, init, join, kill, sleep, spawn, spin, wait_queue_create, wait_queue_destroy,
    wake_all, wake_next, yield_now, yield_to, Tid, WaitQueue, EXIT_CODE_FATAL, EXIT_CODE_KILL,
    MAX_THREADS, THREAD_STACK_SIZE,
};

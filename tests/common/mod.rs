//! Shared fixtures for the scenario tests.
//!
//! Each test binary is built without the libtest harness so that every
//! scenario runs on the real main thread: the scheduler owns the kernel
//! thread that called `init`, and the timer signal must land on it.

#![allow(dead_code)]

use core::sync::atomic::{AtomicUsize, Ordering};

use strand::{Tid, MAX_THREADS};

/// Fresh library state; call before every scenario.
pub fn set_up() {
    assert!(strand::init().is_ok());
}

/// Fresh library state with the preemption timer armed.
pub fn set_up_preemptive() {
    assert!(strand::init().is_ok());
    strand::interrupts::init();
}

/// Announce and run one scenario.
pub fn scenario(name: &str, f: fn()) {
    println!("running scenario: {}", name);
    f();
    println!("scenario passed: {}", name);
}

/// Yield until the main thread is the only runnable one. Returns the
/// number of yields performed, counting the final self-yield.
pub fn yield_till_main_thread() -> usize {
    let mut num_yields = 0;
    loop {
        let result = strand::yield_now();
        assert!(result < MAX_THREADS);
        num_yields += 1;
        if result == 0 {
            return num_yields;
        }
    }
}

/// Yield to `tid` until that thread is gone. Returns the number of yields
/// performed, counting the final failing one.
pub fn yieldto_till_main_thread(tid: Tid) -> usize {
    let mut num_yields = 0;
    loop {
        let result = strand::yield_to(tid);
        num_yields += 1;
        if result.is_err() {
            return num_yields;
        }
    }
}

// Where worker threads record the address of a stack local, indexed by tid.
pub static STACK_ADDRS: [AtomicUsize; MAX_THREADS] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicUsize = AtomicUsize::new(0);
    [ZERO; MAX_THREADS]
};

// Functions to run inside spawned threads

pub fn f_do_nothing() {}

pub fn f_yield_back_once() {
    let _ = strand::yield_to(0);
}

pub fn f_yield_back_twice() {
    let _ = strand::yield_to(0);
    let _ = strand::yield_to(0);
}

pub fn f_no_exit() {
    loop {
        strand::yield_now();
    }
}

pub fn f_save_to_array() {
    let x: i32 = 5;
    STACK_ADDRS[strand::current()].store(&x as *const i32 as usize, Ordering::Relaxed);
}

/// Compute n! while yielding at every level of the recursion.
pub fn factorial(n: u64) -> u64 {
    if n == 1 {
        return 1;
    }
    strand::yield_now();
    n * factorial(n - 1)
}

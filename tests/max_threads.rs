//! Scenarios that exercise the full thread table: slot exhaustion, slot
//! reuse after reaping, kill sweeps, and stack layout properties.

mod common;

use core::sync::atomic::{AtomicBool, Ordering};

use common::{scenario, set_up, yield_till_main_thread, STACK_ADDRS};
use strand::{ThreadError, MAX_THREADS, THREAD_STACK_SIZE};

fn spawn_all(f: fn()) -> Vec<strand::Tid> {
    let mut children = Vec::with_capacity(MAX_THREADS - 1);
    for _ in 0..MAX_THREADS - 1 {
        let tid = strand::spawn(f).expect("spawn");
        assert!(tid >= 1);
        assert!(tid < MAX_THREADS);
        children.push(tid);
    }
    children
}

fn scenario_create_max_and_recreate() {
    set_up();
    spawn_all(common::f_yield_back_once);

    // Every slot is taken now; one more create must fail.
    assert_eq!(
        strand::spawn(common::f_yield_back_once),
        Err(ThreadError::SysThread)
    );

    yield_till_main_thread();

    // The finished threads were reaped, so all slots are available again.
    spawn_all(common::f_yield_back_once);
    yield_till_main_thread();
}

fn scenario_yield_and_kill_all() {
    set_up();
    let children = spawn_all(common::f_yield_back_twice);

    // Give every child a chance to run.
    for _ in 0..MAX_THREADS {
        let result = strand::yield_now();
        assert!(result < MAX_THREADS);
    }

    for &tid in &children {
        assert_eq!(strand::kill(tid), Ok(tid));
    }

    // Killed threads never run again, so draining the ready queue takes at
    // most a handful of yields.
    let yields = yield_till_main_thread();
    assert!(yields <= MAX_THREADS + 1);
}

fn scenario_kill_before_first_dispatch() {
    set_up();
    let children = spawn_all(common::f_yield_back_twice);

    for &tid in &children {
        assert_eq!(strand::kill(tid), Ok(tid));
    }

    // The victims were removed from the ready queue before ever running.
    for &tid in &children {
        assert_eq!(strand::yield_to(tid), Err(ThreadError::BadThread));
    }
}

fn scenario_stacks_sufficiently_apart() {
    set_up();

    // Record an address on the main thread's (host-provided) stack too.
    let x: i32 = 5;
    STACK_ADDRS[strand::current()].store(&x as *const i32 as usize, Ordering::Relaxed);

    spawn_all(common::f_save_to_array);
    yield_till_main_thread();

    // Pairwise comparison: active frames of distinct threads must be at
    // least a full stack apart.
    for tid_a in 0..MAX_THREADS {
        for tid_b in 0..MAX_THREADS {
            if tid_a == tid_b {
                continue;
            }
            let addr_a = STACK_ADDRS[tid_a].load(Ordering::Relaxed);
            let addr_b = STACK_ADDRS[tid_b].load(Ordering::Relaxed);
            assert!(addr_a != 0);
            assert!(addr_b != 0);
            assert!(addr_a.abs_diff(addr_b) >= THREAD_STACK_SIZE);
        }
    }
}

static FP_FORMATTED: AtomicBool = AtomicBool::new(false);

fn scenario_fp_alignment() {
    set_up();
    FP_FORMATTED.store(false, Ordering::SeqCst);

    let tid = strand::spawn(|| {
        let yielded = strand::yield_to(strand::current());
        assert_eq!(yielded, Ok(strand::current()));

        // Formatting a float exercises SSE instructions that fault on a
        // misaligned stack frame.
        let text = format!("{:3.0}", strand::current() as f32);
        assert!(!text.trim().is_empty());
        FP_FORMATTED.store(true, Ordering::SeqCst);
    })
    .expect("spawn");

    assert_eq!(strand::yield_to(tid), Ok(tid));
    assert!(FP_FORMATTED.load(Ordering::SeqCst));
}

fn main() {
    scenario("create_max_and_recreate", scenario_create_max_and_recreate);
    scenario("yield_and_kill_all", scenario_yield_and_kill_all);
    scenario(
        "kill_before_first_dispatch",
        scenario_kill_before_first_dispatch,
    );
    scenario(
        "stacks_sufficiently_apart",
        scenario_stacks_sufficiently_apart,
    );
    scenario("fp_alignment", scenario_fp_alignment);
}

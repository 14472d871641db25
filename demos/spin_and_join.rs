//! An application where all threads sleep except for one, non-main thread.
//!
//! Thread 0 of the chain spins until it is the only runnable thread, then
//! exits; every later thread joins its predecessor and reports the exit
//! code it observed. Main joins the last link.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strand::masked_println;

/// Number of threads to create.
const THREAD_COUNT: usize = 32;

static THREAD_IDS: [AtomicUsize; THREAD_COUNT] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicUsize = AtomicUsize::new(0);
    [ZERO; THREAD_COUNT]
};

static ALL_THREADS_CREATED: AtomicBool = AtomicBool::new(false);

fn spin_and_join(num: usize, spin_us: u64) {
    // Wait until the main thread has created the whole chain; only the
    // timer signal can take the CPU away from this loop.
    while !ALL_THREADS_CREATED.load(Ordering::SeqCst) {
        std::hint::spin_loop();
    }

    // Spin, using up the CPU.
    strand::spin(spin_us);

    if num == 0 {
        // Wait until all other threads, including the main one, are asleep.
        while strand::yield_now() != strand::current() {}
    } else {
        // Sleep until the previous thread has finished.
        let target = THREAD_IDS[num - 1].load(Ordering::SeqCst);
        match strand::join(target) {
            Ok(code) => {
                strand::spin(spin_us / 10);
                masked_println!(
                    "TID({}) waited for TID({}), which exited with {}",
                    strand::current(),
                    target,
                    code
                );
            }
            Err(err) => {
                masked_println!(
                    "TID({}) failed waiting for TID({}): {}",
                    strand::current(),
                    target,
                    err
                );
            }
        }
    }

    strand::exit(num as i32 + THREAD_COUNT as i32);
}

fn main() {
    // Initialize the user-level thread package, then arm the timer.
    strand::init().expect("thread library");
    strand::interrupts::init();

    let mut rng = StdRng::seed_from_u64(369);
    for num in 0..THREAD_COUNT {
        let spin_us: u64 = rng.gen_range(0..1_000_000);
        let tid = strand::spawn(move || spin_and_join(num, spin_us)).expect("spawn");
        THREAD_IDS[num].store(tid, Ordering::SeqCst);
    }
    ALL_THREADS_CREATED.store(true, Ordering::SeqCst);

    let last = THREAD_IDS[THREAD_COUNT - 1].load(Ordering::SeqCst);
    match strand::join(last) {
        Ok(code) => {
            masked_println!(
                "TID({}) waited for TID({}), which exited with {}",
                strand::current(),
                last,
                code
            );
        }
        Err(err) => {
            masked_println!("TID({}) failed waiting for TID({}): {}", strand::current(), last, err);
        }
    }
}

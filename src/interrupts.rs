//! Simulated hardware interrupts for the thread library.
//!
//! A periodic `SIGALRM`, armed with `setitimer(2)`, plays the role of the
//! timer interrupt: each delivery preempts the running thread by calling
//! into the scheduler. "Enabling" and "disabling" interrupts means
//! unblocking and blocking that signal in the process signal mask, so a
//! signal that fires while interrupts are disabled stays pending and is
//! delivered as soon as they are re-enabled.
//!
//! The scheduler core never leaves interrupts in a different state than it
//! found them; see the `set`/restore pairs in [`crate::thread`].

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::mem;
use std::ptr;
use std::time::Duration;

use libc::{c_int, itimerval, sigset_t, timeval};

/// How frequently the process is interrupted.
pub const SIGNAL_INTERVAL: Duration = Duration::from_micros(200);

/// The signal that delivers the simulated interrupt.
const TIMER_SIGNAL: c_int = libc::SIGALRM;

/// Number of timer signals delivered so far.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Whether the handler and timer have been installed.
static INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn timer_signal_handler(_signal: c_int) {
    let ticks = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    log::trace!("interrupt: timer tick {}", ticks);

    // The kernel blocks TIMER_SIGNAL for the duration of this handler; the
    // scheduler may switch away from this frame, and the thread switched
    // to unblocks the signal itself when it restores its own mask state.
    crate::thread::preempt();
}

/// Install the periodic timer signal and enable interrupts.
///
/// Must be called after [`crate::thread::init`]. Preemption starts as soon
/// as this returns; until then the library is purely cooperative.
pub fn init() {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = timer_signal_handler as usize;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(TIMER_SIGNAL, &action, ptr::null_mut());

        let period = timeval {
            tv_sec: 0,
            tv_usec: SIGNAL_INTERVAL.as_micros() as libc::suseconds_t,
        };
        let timer = itimerval {
            it_interval: period,
            it_value: period,
        };
        libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut());
    }

    INSTALLED.store(true, Ordering::SeqCst);
    log::debug!(
        "interrupts: timer armed at {} us",
        SIGNAL_INTERVAL.as_micros()
    );
    enable();
}

/// Set whether interrupts are enabled, returning the prior state.
pub fn set(enabled: bool) -> bool {
    let mask = timer_signal_set();
    let mut prior: sigset_t = unsafe { mem::zeroed() };
    let how = if enabled {
        libc::SIG_UNBLOCK
    } else {
        libc::SIG_BLOCK
    };
    unsafe {
        libc::sigprocmask(how, &mask, &mut prior);
        libc::sigismember(&prior, TIMER_SIGNAL) == 0
    }
}

/// Enable interrupts, returning the prior state.
pub fn enable() -> bool {
    set(true)
}

/// Disable interrupts, returning the prior state.
pub fn disable() -> bool {
    set(false)
}

/// Whether interrupts are currently enabled.
pub fn are_enabled() -> bool {
    let mut current: sigset_t = unsafe { mem::zeroed() };
    unsafe {
        libc::sigprocmask(libc::SIG_BLOCK, ptr::null(), &mut current);
        libc::sigismember(&current, TIMER_SIGNAL) == 0
    }
}

/// Number of timer signals delivered since [`init`].
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Whether [`init`] has run.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

fn timer_signal_set() -> sigset_t {
    unsafe {
        let mut set: sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, TIMER_SIGNAL);
        set
    }
}

/// Print to stdout with the timer signal masked, so the output of
/// concurrent threads is never interleaved mid-line.
#[macro_export]
macro_rules! masked_println {
    ($($arg:tt)*) => {{
        let prior = $crate::interrupts::set(false);
        ::std::println!($($arg)*);
        $crate::interrupts::set(prior);
    }};
}

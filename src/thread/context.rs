//! CPU context for thread context switching.
//!
//! This module defines the register state that must be saved and restored
//! when one thread gives up the CPU to another. Every switch in this
//! library is voluntary from the CPU's point of view (the timer signal
//! handler calls into the scheduler like any other function), so only the
//! callee-saved registers, the stack pointer, the resume address, and the
//! flags need to be preserved.

/// Saved register state of a suspended thread.
///
/// The layout is designed to match the order the assembly in
/// `arch::x86_64::context_switch` reads and writes. The `#[repr(C)]`
/// attribute ensures predictable memory layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    /// RBX - callee-saved general purpose register
    pub rbx: u64,
    /// RBP - base pointer (callee-saved)
    pub rbp: u64,
    /// R12 - callee-saved general purpose register
    pub r12: u64,
    /// R13 - callee-saved general purpose register
    pub r13: u64,
    /// R14 - callee-saved general purpose register
    pub r14: u64,
    /// R15 - callee-saved general purpose register
    pub r15: u64,
    /// RSP - stack pointer
    pub rsp: u64,
    /// RIP - resume address
    pub rip: u64,
    /// RFLAGS - processor flags
    pub rflags: u64,
}

impl CpuContext {
    /// Create a new CPU context initialized to zero.
    pub const fn new() -> Self {
        CpuContext {
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: 0,
            rip: 0,
            rflags: 0,
        }
    }

    /// Initialize a context for a thread that has never run.
    ///
    /// Sets up the context so that when switched to, execution will begin
    /// at `entry_point` with the stack pointer just below `stack_top`.
    ///
    /// # Arguments
    /// * `stack_top` - The top of the thread's stack (highest address,
    ///   16-byte aligned)
    /// * `entry_point` - The function address where execution should begin
    pub fn for_new_thread(stack_top: u64, entry_point: u64) -> Self {
        // RFLAGS image for a fresh frame: reserved bit 1 plus IF, matching
        // what pushfq records during ordinary execution.
        const INITIAL_RFLAGS: u64 = 0x202;

        CpuContext {
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            // The stack must be 16-byte aligned before a call instruction;
            // subtract 8 for the return-address slot that a call would have
            // pushed, so the entry point sees a normally-aligned frame.
            rsp: stack_top - 8,
            rip: entry_point,
            rflags: INITIAL_RFLAGS,
        }
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

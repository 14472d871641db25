//! Assembly-level context switching for x86-64.
//!
//! This module provides the low-level switch functions that save the
//! current thread's CPU state and restore another thread's state.

use core::arch::naked_asm;

use crate::thread::context::CpuContext;

// The CpuContext layout (offsets in bytes):
// 0:  rbx
// 8:  rbp
// 16: r12
// 24: r13
// 32: r14
// 40: r15
// 48: rsp
// 56: rip
// 64: rflags

/// Perform a context switch from one thread to another.
///
/// This function saves the current CPU context to `old_ctx` and loads the
/// context from `new_ctx`. The call returns only when some other thread
/// later switches back to `old_ctx`; at that point it returns normally to
/// its caller, in the original thread.
///
/// # Safety
///
/// - Both pointers must reference valid, distinct contexts; `new_ctx` must
///   describe either a suspended `switch_context` call or a frame built by
///   `CpuContext::for_new_thread` on a live stack.
/// - The timer signal must be masked for the duration of the switch.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(old_ctx: *mut CpuContext, new_ctx: *const CpuContext) {
    naked_asm!(
        // Save callee-saved registers to the old context (rdi = old_ctx)
        "mov [rdi + 0], rbx",
        "mov [rdi + 8], rbp",
        "mov [rdi + 16], r12",
        "mov [rdi + 24], r13",
        "mov [rdi + 32], r14",
        "mov [rdi + 40], r15",
        // Save the stack pointer as it will be once this call has
        // returned, i.e. with the return-address slot popped
        "lea rax, [rsp + 8]",
        "mov [rdi + 48], rax",
        // The resume address is our own return address, at [rsp]
        "mov rax, [rsp]",
        "mov [rdi + 56], rax",
        // Save flags
        "pushfq",
        "pop rax",
        "mov [rdi + 64], rax",
        // Load callee-saved registers from the new context (rsi = new_ctx)
        "mov rbx, [rsi + 0]",
        "mov rbp, [rsi + 8]",
        "mov r12, [rsi + 16]",
        "mov r13, [rsi + 24]",
        "mov r14, [rsi + 32]",
        "mov r15, [rsi + 40]",
        // Load flags (still on the old stack, which stays valid until the
        // final jump)
        "mov rax, [rsi + 64]",
        "push rax",
        "popfq",
        // Load the stack pointer and resume
        "mov rsp, [rsi + 48]",
        "jmp [rsi + 56]",
    );
}

/// Switch to a thread context without saving the current one.
///
/// Used when the current thread has exited and there is nothing left worth
/// saving.
///
/// # Safety
///
/// Same requirements as [`switch_context`] for `new_ctx`. The current
/// stack is abandoned; this function never returns.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to_context(new_ctx: *const CpuContext) {
    naked_asm!(
        // Load callee-saved registers from the new context (rdi = new_ctx)
        "mov rbx, [rdi + 0]",
        "mov rbp, [rdi + 8]",
        "mov r12, [rdi + 16]",
        "mov r13, [rdi + 24]",
        "mov r14, [rdi + 32]",
        "mov r15, [rdi + 40]",
        // Load flags
        "mov rax, [rdi + 64]",
        "push rax",
        "popfq",
        // Load the stack pointer and resume
        "mov rsp, [rdi + 48]",
        "jmp [rdi + 56]",
    );
}

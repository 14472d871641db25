//! Architecture-specific code.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(not(target_arch = "x86_64"))]
compile_error!("the strand thread library only supports x86-64 hosts");

#[macro_use]
mod log_macros;

pub mod error;
pub mod signal;
pub mod supervisor;
pub mod task;
pub mod tracing_init;

mod copy;
mod stdio;

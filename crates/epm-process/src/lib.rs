//! # EPM Process
//!
//! Low-level process operations used by the process controller.
//!
//! This crate provides the primitives the controller is built on:
//! - Process existence verification
//! - Graceful and forced termination signals
//! - Scheduling priority (nice) adjustment
//! - Executable path resolution and name validation

pub mod check;
pub mod priority;
pub mod terminate;
pub mod validation;

// Re-export main types
pub use check::*;
pub use priority::*;
pub use terminate::*;
pub use validation::*;

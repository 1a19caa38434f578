//! # EPM Common
//!
//! Types shared by every crate in the executable process manager: the
//! error taxonomy and the small identifier newtypes that cross crate
//! boundaries.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{ProcessError, ProcessResult};
pub use types::JobId;

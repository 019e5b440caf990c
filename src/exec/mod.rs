//! Execution control
//!
//! Launching, polling and reaping the measured command.

pub mod supervisor;

pub use supervisor::{CommandSupervisor, Enroll};

//! Safety and cleanup
//!
//! Guarantees the accounting scope and the supervised command never outlive a run.

pub mod cleanup;

pub use cleanup::{LifecycleGuard, RunParts, TeardownReport};

//! Run orchestration.
//!
//! Core owns the order in which a run acquires and measures resources;
//! the kernel, exec and sampling modules supply the pieces.

pub mod measure;
pub mod session;
pub mod types;

pub use measure::{measure_peak, measure_peak_with};
pub use session::run;
pub use types::{RunSummary, SUMMARY_SCHEMA};

//! Configuration
//!
//! Run configuration, shared types and the error taxonomy.

pub mod env;
pub mod types;

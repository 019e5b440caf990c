//! Thin wrappers around Linux kernel primitives.
//!
//! Dependency direction: signal -> credentials -> cgroup

pub mod cgroup;
pub mod credentials;
pub mod signal;

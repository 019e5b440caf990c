//! memuse: peak and time-series memory profiling of a command
//!
//! The measured command runs inside a freshly created cgroup whose memory
//! counters are read while it runs. The cgroup is removed afterwards on every
//! path out of a run: normal exit, fatal error or interrupting signal.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::cgroup`]: accounting scope lifecycle and counter reads (unified and legacy layouts)
//! - [`kernel::credentials`]: target identity and the gid-then-uid transition
//! - [`kernel::signal`]: async-safe shutdown flag
//!
//! ## Execution Control ([`exec`])
//! - [`exec::supervisor`]: fork, enroll, release, poll and reap the command
//!
//! ## Sampling ([`sampling`])
//! - [`sampling::sampler`]: per-interval maximum of the live counter
//!
//! ## Run Orchestration ([`core`])
//! - [`core::session`]: the ordered run, returning a [`core::RunSummary`]
//! - [`core::measure`]: peak-only call for embedding, `(exit, peak_bytes)`
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::cleanup`]: exactly-once teardown of command, scope and output
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: run configuration, shared types and the error taxonomy
//! - [`config::env`]: environment lookups
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: sample and PEAK line writer
//!
//! # Design Principles
//!
//! 1. **Kernel as truth** - memory figures come from cgroup counters only
//! 2. **Flags, not work, in signal handlers** - cleanup runs in ordinary control flow
//! 3. **One owner per resource** - the lifecycle guard releases everything once
//! 4. **Minimal unsafe** - confined to fork, exec and the pre-exec child

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Sampling
pub mod sampling;

// Run orchestration
pub mod core;

// Safety & Cleanup
pub mod safety;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the memuse binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use crate::core::measure_peak;

//! Interval sampling of the scope's live memory counter.

pub mod sampler;

pub use sampler::{ChildLiveness, CounterSource, MemorySampler, SamplerState, SamplingOutcome};

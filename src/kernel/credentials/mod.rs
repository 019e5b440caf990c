//! UID/GID handling for the supervised command.
//!
//! The target identity is resolved in the parent; the transition itself runs
//! in the forked child right before exec.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid.

mod identity;
mod transition;

pub use identity::{IdentitySource, TargetIdentity};
pub use transition::transition_to_target;

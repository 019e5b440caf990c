//! Cgroup memory accounting
//!
//! Scope lifecycle over either the unified (v2) hierarchy or the legacy v1
//! memory controller, selected by probing candidate roots in order.

pub mod layout;
pub mod reader;
pub mod scope;

pub use layout::CounterLayout;
pub use reader::CounterReader;
pub use scope::AccountingScope;

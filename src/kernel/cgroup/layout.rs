//! Counter file layout of an accounting root (unified v2 or legacy v1 memory controller).

use std::path::Path;

/// Membership file, identical in both hierarchies
pub const PROCS_FILE: &str = "cgroup.procs";

/// v2-only: kills every member of the cgroup when `1` is written (5.14+)
pub const KILL_FILE: &str = "cgroup.kill";

/// v2-only: present in every cgroup2 directory, including the mount root
pub const CONTROLLERS_FILE: &str = "cgroup.controllers";

/// v2-only: controllers delegated to children of a cgroup
pub const SUBTREE_CONTROL_FILE: &str = "cgroup.subtree_control";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterLayout {
    Unified,
    Legacy,
}

impl CounterLayout {
    /// Detect the layout of a root: v2 if it carries `cgroup.controllers`,
    /// v1 if it carries the legacy usage counter, v2 otherwise.
    pub fn detect(root: &Path) -> Self {
        if root.join(CONTROLLERS_FILE).exists() {
            return CounterLayout::Unified;
        }
        if root.join(CounterLayout::Legacy.current_file()).exists() {
            return CounterLayout::Legacy;
        }
        CounterLayout::Unified
    }

    pub fn current_file(self) -> &'static str {
        match self {
            CounterLayout::Unified => "memory.current",
            CounterLayout::Legacy => "memory.usage_in_bytes",
        }
    }

    pub fn peak_file(self) -> &'static str {
        match self {
            CounterLayout::Unified => "memory.peak",
            CounterLayout::Legacy => "memory.max_usage_in_bytes",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CounterLayout::Unified => "cgroup_v2",
            CounterLayout::Legacy => "cgroup_v1",
        }
    }
}

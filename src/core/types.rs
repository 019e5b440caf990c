use crate::config::types::{ChildExit, MemuseError, Result};
use crate::kernel::credentials::TargetIdentity;
use crate::safety::TeardownReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Schema tag carried by every serialized summary
pub const SUMMARY_SCHEMA: &str = "memuse.summary.v1";

/// Outcome of one measured run, also written as the optional JSON summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema: String,
    /// Shell command line that was measured
    pub command: String,
    pub exit: ChildExit,
    /// Final high-water mark, bytes (the `PEAK` record)
    pub peak_bytes: u64,
    /// Interval samples written, anchor included; 0 without tracing
    pub samples: u64,
    /// Set when the run was cut short by SIGINT/SIGTERM/SIGHUP
    pub interrupted_by: Option<i32>,
    pub scope_path: PathBuf,
    /// `cgroup_v2` or `cgroup_v1`
    pub counter_layout: String,
    pub identity: TargetIdentity,
    pub wall_time_ms: u64,
    pub teardown: TeardownReport,
}

impl RunSummary {
    pub fn was_interrupted(&self) -> bool {
        self.interrupted_by.is_some()
    }

    /// Process exit code for memuse itself; the command's own status is not propagated
    pub fn exit_code(&self) -> i32 {
        match self.interrupted_by {
            Some(sig) => 128 + sig,
            None => 0,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MemuseError::Output(format!("Failed to serialize run summary: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| MemuseError::Config(format!("Failed to parse run summary: {}", e)))
    }
}

/// Core types shared across memuse
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Candidate accounting roots, probed in this order
pub const DEFAULT_CGROUP_ROOTS: [&str; 3] = [
    "/sys/fs/cgroup",
    "/sys/fs/cgroup/unified",
    "/sys/fs/cgroup/memory",
];

/// Default width of one sampling interval
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period between SIGTERM and SIGKILL when stopping the command
pub const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// Environment variable whose presence turns on interval sampling
pub const TRACE_ENV: &str = "MEM_TRACE";

/// Invoking user override consulted for the privilege drop
pub const INVOKING_UID_ENV: &str = "SUDO_UID";

/// Invoking group override consulted for the privilege drop
pub const INVOKING_GID_ENV: &str = "SUDO_GID";

/// Which filesystems may host an accounting scope
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RootPolicy {
    /// Only cgroup (v1 or v2) mounts whose new group exposes a memory counter
    #[default]
    CgroupFsOnly,
    /// Any writable directory; membership is emulated with a plain file.
    /// Used against scratch directories where no cgroup mount is available.
    AnyDirectory,
}

/// Run configuration
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Destination of the sample/peak records
    pub output_path: PathBuf,
    /// Command and arguments, joined with spaces and run through `/bin/sh -c`
    pub command: Vec<String>,
    /// Record interval samples in addition to the final peak
    pub trace: bool,
    /// Width of one sampling interval
    pub sample_interval: Duration,
    /// Pause between counter reads inside an interval (zero = busy poll)
    pub poll_delay: Duration,
    /// Accounting roots to probe, highest priority first
    pub cgroup_roots: Vec<PathBuf>,
    pub root_policy: RootPolicy,
    /// Optional JSON run summary destination
    pub summary_path: Option<PathBuf>,
    /// `SUDO_UID` as seen at startup
    pub invoking_uid: Option<u32>,
    /// `SUDO_GID` as seen at startup
    pub invoking_gid: Option<u32>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::new(),
            command: Vec::new(),
            trace: false,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            poll_delay: Duration::ZERO,
            cgroup_roots: DEFAULT_CGROUP_ROOTS.iter().map(PathBuf::from).collect(),
            root_policy: RootPolicy::default(),
            summary_path: None,
            invoking_uid: None,
            invoking_gid: None,
        }
    }
}

impl ProbeConfig {
    /// Shell command line handed to `/bin/sh -c`
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(MemuseError::Config("empty output path".to_string()));
        }
        self.validate_measurement()
    }

    /// Checks shared by every run, with or without an output file
    pub fn validate_measurement(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(MemuseError::Config("empty command".to_string()));
        }
        if self.sample_interval.is_zero() {
            return Err(MemuseError::Config(
                "sample interval must be greater than zero".to_string(),
            ));
        }
        if self.cgroup_roots.is_empty() {
            return Err(MemuseError::Config(
                "no candidate cgroup roots configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Maximum memory observed during one sampling interval
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Interval number, 0 for the anchor sample
    pub index: u64,
    /// Time since sampling started (monotonic)
    pub elapsed: Duration,
    /// Bytes
    pub value: u64,
}

impl Sample {
    pub fn elapsed_us(&self) -> u128 {
        self.elapsed.as_micros()
    }
}

/// How the supervised command ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Exited(code) => write!(f, "exited with status {}", code),
            ChildExit::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// Custom error types for memuse
#[derive(Error, Debug)]
pub enum MemuseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scope error: {0}")]
    Scope(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sampling error: {0}")]
    Sampling(String),
}

impl From<nix::errno::Errno> for MemuseError {
    fn from(err: nix::errno::Errno) -> Self {
        MemuseError::Process(err.to_string())
    }
}

/// Result type alias for memuse operations
pub type Result<T> = std::result::Result<T, MemuseError>;

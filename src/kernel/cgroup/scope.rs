/// Accounting scope: one freshly created cgroup per run
///
/// The scope is a directory under the first candidate root that is a cgroup
/// mount and gives the new group a memory counter. Only the supervised command tree is enrolled, never memuse
/// itself, so the directory can be removed once the command is gone.
use super::layout::{CounterLayout, KILL_FILE, PROCS_FILE, SUBTREE_CONTROL_FILE};
use super::reader::{parse_counter, CounterReader};
use crate::config::types::{MemuseError, Result, RootPolicy};
use log::{debug, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, CGROUP_SUPER_MAGIC};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SCOPE_PREFIX: &str = "memuse_";

/// Names tried under one root before giving up on it
const NAME_ATTEMPTS: u32 = 8;

static SCOPE_SEQ: AtomicU32 = AtomicU32::new(0);

/// rmdir attempts while the kernel finishes reaping killed members
const REMOVE_ATTEMPTS: u32 = 20;
const REMOVE_PAUSE: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct AccountingScope {
    path: PathBuf,
    layout: CounterLayout,
    created: bool,
    /// Lives on a cgroup filesystem (false only under `RootPolicy::AnyDirectory`)
    kernel_backed: bool,
}

impl AccountingScope {
    /// Create a scope under the first root that is a cgroup mount with memory accounting
    pub fn create<P: AsRef<Path>>(roots: &[P]) -> Result<Self> {
        Self::create_with(roots, RootPolicy::CgroupFsOnly)
    }

    /// Create a scope under the first root `policy` accepts.
    ///
    /// A rejected root never keeps the directory made while inspecting it.
    pub fn create_with<P: AsRef<Path>>(roots: &[P], policy: RootPolicy) -> Result<Self> {
        let mut rejected = Vec::new();

        for root in roots {
            let root = root.as_ref();
            if !root.exists() {
                debug!("Cgroup root {} does not exist", root.display());
                rejected.push(format!("{}: missing", root.display()));
                continue;
            }

            match Self::create_under(root, policy) {
                Ok(scope) => return Ok(scope),
                Err(reason) => {
                    debug!("Cannot create scope under {}: {}", root.display(), reason);
                    rejected.push(format!("{}: {}", root.display(), reason));
                }
            }
        }

        Err(MemuseError::Scope(format!(
            "failed to create cgroup ({})",
            rejected.join("; ")
        )))
    }

    fn create_under(root: &Path, policy: RootPolicy) -> std::result::Result<Self, String> {
        let path = make_scope_dir(root).map_err(|e| e.to_string())?;
        let kernel_backed = is_cgroupfs(&path);

        if !kernel_backed {
            if policy == RootPolicy::CgroupFsOnly {
                discard_dir(&path);
                return Err("not a cgroup filesystem".to_string());
            }
            // Stand-in for the membership file the kernel would provide
            if let Err(e) = fs::write(path.join(PROCS_FILE), "") {
                discard_dir(&path);
                return Err(e.to_string());
            }
        }

        let mut scope = AccountingScope {
            path,
            layout: CounterLayout::detect(root),
            created: true,
            kernel_backed,
        };
        scope.ensure_memory_controller(root);

        if kernel_backed && !scope.current_path().exists() {
            scope.destroy();
            return Err("memory controller not available".to_string());
        }

        info!(
            "Created accounting scope {} ({})",
            scope.path.display(),
            scope.layout.name()
        );
        Ok(scope)
    }

    /// Delegate the memory controller from a v2 root when the new scope lacks counters
    fn ensure_memory_controller(&self, root: &Path) {
        if !self.kernel_backed
            || self.layout != CounterLayout::Unified
            || !root.join(super::layout::CONTROLLERS_FILE).exists()
            || self.path.join(self.layout.current_file()).exists()
        {
            return;
        }

        match fs::write(root.join(SUBTREE_CONTROL_FILE), "+memory") {
            Ok(()) => info!("Enabled memory controller under {}", root.display()),
            Err(e) => debug!(
                "Could not enable memory controller under {}: {}",
                root.display(),
                e
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> CounterLayout {
        self.layout
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_kernel_backed(&self) -> bool {
        self.kernel_backed
    }

    pub fn current_path(&self) -> PathBuf {
        self.path.join(self.layout.current_file())
    }

    pub fn peak_path(&self) -> PathBuf {
        self.path.join(self.layout.peak_file())
    }

    /// Move `pid` (and its future children) into the scope
    pub fn enroll(&self, pid: u32) -> Result<()> {
        let procs_path = self.path.join(PROCS_FILE);
        // Never O_CREAT: a missing membership file means this is not a cgroup
        OpenOptions::new()
            .write(true)
            .open(&procs_path)
            .and_then(|mut file| file.write_all(pid.to_string().as_bytes()))
            .map_err(|e| {
                MemuseError::Scope(format!(
                    "Failed to enroll pid {} into {}: {}",
                    pid,
                    self.path.display(),
                    e
                ))
            })?;
        debug!("Enrolled pid {} into {}", pid, self.path.display());
        Ok(())
    }

    /// Live usage; unreadable counters read as zero
    pub fn read_current(&self) -> u64 {
        soft_read(&self.current_path())
    }

    /// High-water mark; kernels without `memory.peak` fall back to the live counter
    pub fn read_peak(&self) -> u64 {
        let peak_path = self.peak_path();
        if peak_path.exists() {
            return soft_read(&peak_path);
        }
        debug!(
            "{} not available, using {}",
            peak_path.display(),
            self.layout.current_file()
        );
        self.read_current()
    }

    /// Open the live counter for the sampling loop
    pub fn open_current(&self) -> Result<CounterReader> {
        CounterReader::open(&self.current_path())
    }

    /// Pids currently enrolled; an unreadable membership file counts as empty
    pub fn member_pids(&self) -> Vec<i32> {
        match fs::read_to_string(self.path.join(PROCS_FILE)) {
            Ok(content) => content
                .lines()
                .filter_map(|line| line.trim().parse::<i32>().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Remove the scope directory. Idempotent; failures are logged, never raised.
    ///
    /// Returns true when the directory is gone afterwards.
    pub fn destroy(&mut self) -> bool {
        if !self.created {
            return true;
        }

        self.evict_members();
        if !self.kernel_backed {
            if let Err(e) = fs::remove_file(self.path.join(PROCS_FILE)) {
                if e.kind() != ErrorKind::NotFound {
                    debug!("Failed to remove emulated membership file: {}", e);
                }
            }
        }

        for attempt in 1..=REMOVE_ATTEMPTS {
            match fs::remove_dir(&self.path) {
                Ok(()) => {
                    info!("Removed accounting scope {}", self.path.display());
                    self.created = false;
                    return true;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Scope {} already removed", self.path.display());
                    self.created = false;
                    return true;
                }
                Err(e) if attempt < REMOVE_ATTEMPTS && e.raw_os_error() == Some(libc::EBUSY) => {
                    std::thread::sleep(REMOVE_PAUSE);
                }
                Err(e) => {
                    warn!(
                        "Failed to remove accounting scope {}: {}",
                        self.path.display(),
                        e
                    );
                    return false;
                }
            }
        }
        false
    }

    /// Kill processes still enrolled (detached grandchildren) so rmdir can succeed
    fn evict_members(&self) {
        // A plain directory's membership file is stale, never signal from it
        if !self.kernel_backed {
            return;
        }
        let members = self.member_pids();
        if members.is_empty() {
            return;
        }

        warn!(
            "{} process(es) still in {}, killing",
            members.len(),
            self.path.display()
        );

        let kill_path = self.path.join(KILL_FILE);
        if kill_path.exists() {
            match fs::write(&kill_path, "1") {
                Ok(()) => return,
                Err(e) => debug!("cgroup.kill failed, signalling members: {}", e),
            }
        }

        for pid in members {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!("SIGKILL to {} failed: {}", pid, e);
            }
        }
    }
}

fn is_cgroupfs(path: &Path) -> bool {
    match statfs(path) {
        Ok(fs) => {
            let kind = fs.filesystem_type();
            kind == CGROUP2_SUPER_MAGIC || kind == CGROUP_SUPER_MAGIC
        }
        Err(e) => {
            debug!("statfs({}) failed: {}", path.display(), e);
            false
        }
    }
}

fn soft_read(path: &Path) -> u64 {
    match fs::read(path) {
        Ok(raw) => parse_counter(&raw).unwrap_or_else(|| {
            warn!("Unparsable counter in {}, treating as 0", path.display());
            0
        }),
        Err(e) => {
            warn!("Failed to read {}: {}, treating as 0", path.display(), e);
            0
        }
    }
}

/// `memuse_<secs><nanos>_<pid>_<seq>`
fn scope_name() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seq = SCOPE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}{}{:09}_{}_{}",
        SCOPE_PREFIX,
        now.as_secs(),
        now.subsec_nanos(),
        std::process::id(),
        seq
    )
}

/// mkdir a fresh scope, picking a new name if one is already taken
fn make_scope_dir(root: &Path) -> io::Result<PathBuf> {
    let mut attempt = 1;
    loop {
        let path = root.join(scope_name());
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < NAME_ATTEMPTS => {
                debug!("{} already exists, retrying", path.display());
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn discard_dir(path: &Path) {
    if let Err(e) = fs::remove_dir(path) {
        warn!("Failed to remove rejected scope {}: {}", path.display(), e);
    }
}

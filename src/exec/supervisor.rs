//! Supervisor for the measured command.
//!
//! Launch sequence:
//! 1. build every C string the child needs (the child never allocates)
//! 2. fork; the child blocks on a start pipe
//! 3. the parent enrolls the child pid into the accounting scope
//! 4. the parent releases the child, which drops privileges and execs `/bin/sh -c`
//!
//! The child is reaped exactly once: whichever of [`CommandSupervisor::poll_running`],
//! [`CommandSupervisor::wait_final`] or [`CommandSupervisor::terminate`] observes the
//! exit records it, and later calls return the recorded status.

use crate::config::types::{ChildExit, MemuseError, Result, TERMINATE_GRACE};
use crate::kernel::cgroup::AccountingScope;
use crate::kernel::credentials::{transition_to_target, TargetIdentity};
use crate::kernel::signal::ShutdownProbe;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::raw::c_char;
use std::time::{Duration, Instant};

const SHELL: &str = "/bin/sh";

/// Exit status of a child that could not drop privileges or was never enrolled
const CHILD_SETUP_FAILED: i32 = 1;

/// Exit status of a child whose exec failed
const CHILD_EXEC_FAILED: i32 = 127;

const POLL_PAUSE: Duration = Duration::from_millis(10);

/// Target of the enrollment step; implemented by the accounting scope
pub trait Enroll {
    fn enroll(&self, pid: u32) -> Result<()>;
}

impl Enroll for AccountingScope {
    fn enroll(&self, pid: u32) -> Result<()> {
        AccountingScope::enroll(self, pid)
    }
}

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> MemuseError {
    MemuseError::Process(format!("{prefix}: {err}"))
}

#[derive(Debug)]
pub struct CommandSupervisor {
    pid: Pid,
    command_line: String,
    exit: Option<ChildExit>,
}

impl CommandSupervisor {
    /// Fork `/bin/sh -c <command_line>` as `identity`, enrolled into `scope`
    pub fn launch(
        command_line: &str,
        scope: &dyn Enroll,
        identity: &TargetIdentity,
    ) -> Result<Self> {
        let shell = CString::new(SHELL).map_err(|e| to_process_error("shell path", e))?;
        let argv = [
            CString::new("sh").map_err(|e| to_process_error("argv", e))?,
            CString::new("-c").map_err(|e| to_process_error("argv", e))?,
            CString::new(command_line).map_err(|_| {
                MemuseError::Config("command contains an interior NUL byte".to_string())
            })?,
        ];
        let argv_ptrs: Vec<*const c_char> = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        let (start_read, start_write) = start_pipe()?;

        // SAFETY: memuse is single-threaded at this point and the child only
        // performs async-signal-safe calls before exec or _exit.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(start_write);
                run_child(start_read, &shell, &argv_ptrs, identity)
            }
            Ok(ForkResult::Parent { child }) => {
                drop(start_read);
                log::info!("Forked command pid {}: {}", child, command_line);

                let mut supervisor = CommandSupervisor {
                    pid: child,
                    command_line: command_line.to_string(),
                    exit: None,
                };

                // Dropping start_write unreleased makes the child exit on EOF.
                if let Err(e) = scope.enroll(child.as_raw() as u32) {
                    drop(start_write);
                    supervisor.reap_blocking().ok();
                    return Err(e);
                }

                let mut release = File::from(start_write);
                if let Err(e) = release.write_all(&[1]) {
                    drop(release);
                    supervisor.reap_blocking().ok();
                    return Err(to_process_error("release command", e));
                }
                Ok(supervisor)
            }
            Err(e) => Err(to_process_error("Failed to fork process", e)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Exit status, once reaped
    pub fn exit(&self) -> Option<ChildExit> {
        self.exit
    }

    pub fn is_reaped(&self) -> bool {
        self.exit.is_some()
    }

    /// Non-blocking reap. Never calls waitpid again once the exit is recorded.
    pub fn poll_running(&mut self) -> Result<bool> {
        if self.exit.is_some() {
            return Ok(false);
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(true),
            Ok(status) => Ok(!self.record(status)),
            Err(Errno::EINTR) => Ok(true),
            Err(e) => Err(to_process_error("waitpid(command)", e)),
        }
    }

    /// Wait for the command to exit on its own, terminating it if shutdown is requested
    pub fn wait_final(&mut self, shutdown: &dyn ShutdownProbe) -> Result<ChildExit> {
        loop {
            if let Some(exit) = self.exit {
                return Ok(exit);
            }
            if shutdown.shutdown_requested() {
                log::info!(
                    "Shutdown requested (signal {}), stopping command pid {}",
                    shutdown.signal(),
                    self.pid
                );
                return self.terminate(TERMINATE_GRACE);
            }
            if self.poll_running()? {
                std::thread::sleep(POLL_PAUSE);
            }
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and reap
    pub fn terminate(&mut self, grace: Duration) -> Result<ChildExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }

        self.signal(Signal::SIGTERM);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.poll_running()? {
                return self.reap_blocking();
            }
            std::thread::sleep(POLL_PAUSE);
        }

        log::warn!("Command pid {} ignored SIGTERM, sending SIGKILL", self.pid);
        self.signal(Signal::SIGKILL);
        self.reap_blocking()
    }

    /// SIGKILL and a blocking reap, no grace period
    pub fn kill_and_reap(&mut self) -> Result<ChildExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        self.signal(Signal::SIGKILL);
        self.reap_blocking()
    }

    fn signal(&self, sig: Signal) {
        match kill(self.pid, sig) {
            Ok(()) => log::debug!("Sent {} to pid {}", sig, self.pid),
            Err(Errno::ESRCH) => log::debug!("pid {} already gone before {}", self.pid, sig),
            Err(e) => log::warn!("Failed to send {} to pid {}: {}", sig, self.pid, e),
        }
    }

    fn reap_blocking(&mut self) -> Result<ChildExit> {
        loop {
            if let Some(exit) = self.exit {
                return Ok(exit);
            }
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.record(status);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(to_process_error("waitpid(command)", e)),
            }
        }
    }

    /// Returns true when `status` is terminal
    fn record(&mut self, status: WaitStatus) -> bool {
        let exit = match status {
            WaitStatus::Exited(_, code) => ChildExit::Exited(code),
            WaitStatus::Signaled(_, sig, _) => ChildExit::Signaled(sig as i32),
            _ => return false,
        };
        log::info!("Command pid {} {}", self.pid, exit);
        self.exit = Some(exit);
        true
    }
}

fn start_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds has room for the two descriptors pipe2 writes.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(to_process_error(
            "pipe(start)",
            std::io::Error::last_os_error(),
        ));
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Child side of the fork. Never returns.
fn run_child(
    start: OwnedFd,
    shell: &CStr,
    argv: &[*const c_char],
    identity: &TargetIdentity,
) -> ! {
    let mut byte = [0u8; 1];
    let n = loop {
        // SAFETY: byte is a valid one-byte buffer.
        let n = unsafe { libc::read(start.as_raw_fd(), byte.as_mut_ptr().cast(), 1) };
        if n < 0 && Errno::last() == Errno::EINTR {
            continue;
        }
        break n;
    };
    if n != 1 {
        child_exit(b"memuse: command was not enrolled, aborting\n", CHILD_SETUP_FAILED);
    }

    // Rust ignores SIGPIPE in its own process; the command expects the default.
    // SAFETY: resetting a disposition is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    if let Err(msg) = transition_to_target(identity) {
        child_exit(msg.as_bytes(), CHILD_SETUP_FAILED);
    }

    // SAFETY: argv is a NULL-terminated array of pointers into CStrings that
    // outlive this call.
    unsafe {
        libc::execv(shell.as_ptr(), argv.as_ptr());
    }
    child_exit(b"memuse: failed to execute command\n", CHILD_EXEC_FAILED)
}

fn child_exit(msg: &[u8], code: i32) -> ! {
    // SAFETY: write(2) and _exit(2) are async-signal-safe.
    unsafe {
        libc::write(2, msg.as_ptr().cast(), msg.len());
        libc::_exit(code)
    }
}

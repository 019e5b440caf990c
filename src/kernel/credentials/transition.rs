//! UID/GID transition performed in the forked child.
//!
//! Runs between fork and exec: no allocation, no logging. Failures are
//! returned as static messages the caller writes to stderr.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid to prevent
//! privilege escalation through saved-set-user-ID.

use super::identity::TargetIdentity;
use nix::unistd::{geteuid, getgid, getuid, setgroups, setresgid, setresuid, Gid, Uid};

/// clear groups -> setresgid -> setresuid -> verify
pub fn transition_to_target(target: &TargetIdentity) -> Result<(), &'static str> {
    let uid = Uid::from_raw(target.uid);
    let gid = Gid::from_raw(target.gid);

    if getuid() == uid && geteuid() == uid && getgid() == gid {
        return Ok(());
    }

    // Supplementary groups can only be changed while privileged
    if geteuid().is_root() && !uid.is_root() {
        setgroups(&[gid]).map_err(|_| "memuse: failed to drop supplementary groups\n")?;
    }

    // CRITICAL: GID before UID
    setresgid(gid, gid, gid).map_err(|_| "memuse: failed to drop privileges (setresgid)\n")?;
    setresuid(uid, uid, uid).map_err(|_| "memuse: failed to drop privileges (setresuid)\n")?;

    if getuid() != uid || geteuid() != uid {
        return Err("memuse: privilege drop verification failed\n");
    }
    Ok(())
}

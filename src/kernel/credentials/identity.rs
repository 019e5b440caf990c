//! Target identity resolution.

use crate::config::types::{MemuseError, Result, INVOKING_GID_ENV};
use nix::unistd::{getgid, getuid, Uid, User};
use serde::{Deserialize, Serialize};

/// Where the target identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// `SUDO_UID`/`SUDO_GID` left by the launcher that elevated us
    InvokingUser,
    /// Real ids of the memuse process itself
    RealIds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub uid: u32,
    pub gid: u32,
    pub source: IdentitySource,
}

impl TargetIdentity {
    /// Invoking-user overrides win. A uid override without a gid takes that
    /// user's primary group from the user database, never memuse's own gid.
    pub fn resolve(invoking_uid: Option<u32>, invoking_gid: Option<u32>) -> Result<Self> {
        Self::resolve_with(
            invoking_uid,
            invoking_gid,
            getuid().as_raw(),
            getgid().as_raw(),
            primary_gid,
        )
    }

    fn resolve_with(
        invoking_uid: Option<u32>,
        invoking_gid: Option<u32>,
        real_uid: u32,
        real_gid: u32,
        lookup_gid: impl Fn(u32) -> Option<u32>,
    ) -> Result<Self> {
        let Some(uid) = invoking_uid else {
            return Ok(TargetIdentity {
                uid: real_uid,
                gid: invoking_gid.unwrap_or(real_gid),
                source: IdentitySource::RealIds,
            });
        };

        let gid = match invoking_gid.or_else(|| lookup_gid(uid)) {
            Some(gid) => gid,
            None if uid != 0 && real_gid == 0 => {
                return Err(MemuseError::Privilege(format!(
                    "no primary group known for uid {}; set {} to run without the root group",
                    uid, INVOKING_GID_ENV
                )));
            }
            None => {
                log::warn!("No primary group known for uid {}, using gid {}", uid, real_gid);
                real_gid
            }
        };

        Ok(TargetIdentity {
            uid,
            gid,
            source: IdentitySource::InvokingUser,
        })
    }

    /// The command would keep running as root
    pub fn retains_root(&self) -> bool {
        self.uid == 0
    }

    /// Log the resolved identity; running the command as root is allowed but flagged
    pub fn report(&self) {
        if self.retains_root() {
            log::warn!(
                "Command will run as root (uid=0, source={:?}); \
                 set SUDO_UID or launch through sudo to drop privileges",
                self.source
            );
        } else {
            log::info!(
                "Command will run as uid={} gid={} (source={:?})",
                self.uid,
                self.gid,
                self.source
            );
        }
    }
}

/// Primary group of `uid` from the user database
fn primary_gid(uid: u32) -> Option<u32> {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => Some(user.gid.as_raw()),
        Ok(None) => None,
        Err(e) => {
            log::debug!("User lookup for uid {} failed: {}", uid, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(_: u32) -> Option<u32> {
        None
    }

    fn staff(uid: u32) -> Option<u32> {
        (uid == 1000).then_some(50)
    }

    #[test]
    fn invoking_user_overrides_real_ids() {
        let id = TargetIdentity::resolve_with(Some(1000), Some(1001), 0, 0, staff).unwrap();
        assert_eq!(id.uid, 1000);
        assert_eq!(id.gid, 1001);
        assert_eq!(id.source, IdentitySource::InvokingUser);
        assert!(!id.retains_root());
    }

    #[test]
    fn falls_back_to_real_ids() {
        let id = TargetIdentity::resolve_with(None, None, 1000, 100, staff).unwrap();
        assert_eq!(id.uid, 1000);
        assert_eq!(id.gid, 100);
        assert_eq!(id.source, IdentitySource::RealIds);
    }

    #[test]
    fn missing_gid_uses_primary_group_of_invoking_user() {
        let id = TargetIdentity::resolve_with(Some(1000), None, 0, 0, staff).unwrap();
        assert_eq!(id.uid, 1000);
        assert_eq!(id.gid, 50);
        assert_eq!(id.source, IdentitySource::InvokingUser);
    }

    #[test]
    fn unknown_user_never_inherits_root_group() {
        let err = TargetIdentity::resolve_with(Some(1000), None, 0, 0, unknown).unwrap_err();
        match err {
            MemuseError::Privilege(msg) => assert!(msg.contains(INVOKING_GID_ENV)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_user_keeps_non_root_real_gid() {
        let id = TargetIdentity::resolve_with(Some(1000), None, 0, 100, unknown).unwrap();
        assert_eq!(id.gid, 100);
    }

    #[test]
    fn direct_root_launch_retains_root() {
        let id = TargetIdentity::resolve_with(None, None, 0, 0, unknown).unwrap();
        assert!(id.retains_root());
        assert_eq!(id.source, IdentitySource::RealIds);
    }

    #[test]
    fn primary_gid_reads_user_database() {
        // uid 0 is present on any system this runs on
        assert_eq!(primary_gid(0), Some(0));
    }

    #[test]
    fn resolve_uses_process_ids_without_overrides() {
        let id = TargetIdentity::resolve(None, None).unwrap();
        assert_eq!(id.uid, getuid().as_raw());
        assert_eq!(id.gid, getgid().as_raw());
    }
}

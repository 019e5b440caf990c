//! Peak-only measurement for callers embedding memuse as a library.

use crate::config::env::{EnvSource, ProcessEnv};
use crate::config::types::{
    ChildExit, MemuseError, ProbeConfig, Result, INVOKING_GID_ENV, INVOKING_UID_ENV,
};
use crate::core::session::run;
use crate::kernel::signal::{NeverShutdown, ShutdownProbe};
use std::path::PathBuf;

/// Records are discarded; the peak comes back through the summary
const DISCARD_PATH: &str = "/dev/null";

/// Run `command` in a fresh accounting scope under the default roots and
/// return how it ended together with its peak memory in bytes.
///
/// Requires root. `SUDO_UID`/`SUDO_GID` pick the identity the command runs as,
/// exactly as for the binary.
pub fn measure_peak(command: &[String]) -> Result<(ChildExit, u64)> {
    if !nix::unistd::geteuid().is_root() {
        return Err(MemuseError::Privilege(
            "creating a cgroup requires root".to_string(),
        ));
    }

    let env = ProcessEnv;
    let config = ProbeConfig {
        command: command.to_vec(),
        invoking_uid: env.id(INVOKING_UID_ENV),
        invoking_gid: env.id(INVOKING_GID_ENV),
        ..ProbeConfig::default()
    };
    measure_peak_with(&config, &NeverShutdown)
}

/// [`measure_peak`] with explicit roots, identity and shutdown source.
/// `output_path` and `trace` are ignored.
pub fn measure_peak_with(
    config: &ProbeConfig,
    shutdown: &dyn ShutdownProbe,
) -> Result<(ChildExit, u64)> {
    config.validate_measurement()?;
    let config = ProbeConfig {
        output_path: PathBuf::from(DISCARD_PATH),
        trace: false,
        summary_path: None,
        ..config.clone()
    };

    let summary = run(&config, shutdown)?;
    if !summary.teardown.is_clean() {
        log::warn!("Teardown after measurement: {:?}", summary.teardown.errors);
    }
    Ok((summary.exit, summary.peak_bytes))
}

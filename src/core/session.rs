//! One measured run, end to end.
//!
//! ```text
//! open output -> create scope -> launch -> [sample] -> final wait -> PEAK -> teardown
//! ```
//!
//! Every acquired resource goes straight into a [`LifecycleGuard`], so a `?`
//! anywhere below still stops the command and removes the scope. PEAK is only
//! written on the non-fatal path.

use crate::config::types::{MemuseError, ProbeConfig, Result};
use crate::core::types::{RunSummary, SUMMARY_SCHEMA};
use crate::exec::CommandSupervisor;
use crate::kernel::cgroup::AccountingScope;
use crate::kernel::credentials::TargetIdentity;
use crate::kernel::signal::ShutdownProbe;
use crate::safety::LifecycleGuard;
use crate::sampling::{MemorySampler, SamplingOutcome};
use crate::utils::output::ResultWriter;
use log::{debug, info};
use std::time::Instant;

pub fn run(config: &ProbeConfig, shutdown: &dyn ShutdownProbe) -> Result<RunSummary> {
    config.validate()?;
    let started = Instant::now();

    let identity = TargetIdentity::resolve(config.invoking_uid, config.invoking_gid)?;
    identity.report();

    let mut guard = LifecycleGuard::new();
    guard.attach_writer(ResultWriter::open(&config.output_path)?);
    let scope = AccountingScope::create_with(&config.cgroup_roots, config.root_policy)?;
    let scope_path = scope.path().to_path_buf();
    let counter_layout = scope.layout().name().to_string();
    guard.attach_scope(scope);

    let command_line = config.command_line();
    let scope = guard
        .scope()
        .ok_or_else(|| MemuseError::Scope("accounting scope not attached".to_string()))?;
    let command = CommandSupervisor::launch(&command_line, scope, &identity)?;
    guard.attach_command(command);

    let parts = guard.parts_mut()?;
    let mut samples = 0;
    if config.trace {
        let mut counter = parts.scope.open_current()?;
        let anchor = parts.scope.read_peak();
        let mut sampler = MemorySampler::new(config.sample_interval, config.poll_delay);
        let outcome = sampler.run(
            anchor,
            &mut counter,
            &mut *parts.command,
            &mut *parts.writer,
            shutdown,
        )?;
        samples = match outcome {
            SamplingOutcome::Drained { samples } => samples,
            SamplingOutcome::Interrupted { samples } => samples,
        };
    } else {
        debug!("Interval sampling disabled");
    }

    let exit = parts.command.wait_final(shutdown)?;
    info!("Command {}", exit);

    let interrupted_by = shutdown.shutdown_requested().then(|| shutdown.signal());
    let peak_bytes = parts.scope.read_peak();
    parts.writer.write_peak(peak_bytes)?;

    let teardown = guard.teardown();
    Ok(RunSummary {
        schema: SUMMARY_SCHEMA.to_string(),
        command: command_line,
        exit,
        peak_bytes,
        samples,
        interrupted_by,
        scope_path,
        counter_layout,
        identity,
        wall_time_ms: started.elapsed().as_millis() as u64,
        teardown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ChildExit, RootPolicy};
    use crate::kernel::signal::NeverShutdown;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Scratch directory standing in for a cgroup root
    fn config(dir: &Path, command: &[&str]) -> ProbeConfig {
        let root = dir.join("root");
        fs::create_dir_all(&root).unwrap();
        ProbeConfig {
            output_path: dir.join("out.txt"),
            command: command.iter().map(|s| s.to_string()).collect(),
            cgroup_roots: vec![root],
            root_policy: RootPolicy::AnyDirectory,
            ..ProbeConfig::default()
        }
    }

    #[test]
    fn untraced_run_writes_only_peak() {
        let tmp = tempdir().unwrap();
        let config = config(tmp.path(), &["exit", "3"]);

        let summary = run(&config, &NeverShutdown).unwrap();
        assert_eq!(summary.exit, ChildExit::Exited(3));
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.samples, 0);
        // No accounting files in a plain directory
        assert_eq!(summary.peak_bytes, 0);
        assert!(summary.teardown.is_clean(), "{:?}", summary.teardown);
        assert!(!summary.scope_path.exists());
        assert_eq!(fs::read_to_string(&config.output_path).unwrap(), "PEAK 0\n");
    }

    #[test]
    fn missing_binary_still_produces_peak() {
        let tmp = tempdir().unwrap();
        let config = config(tmp.path(), &["/nonexistent/memuse-test-binary"]);

        let summary = run(&config, &NeverShutdown).unwrap();
        assert_eq!(summary.exit, ChildExit::Exited(127));
        assert!(fs::read_to_string(&config.output_path)
            .unwrap()
            .starts_with("PEAK "));
    }

    #[test]
    fn scope_failure_aborts_without_peak() {
        let tmp = tempdir().unwrap();
        let mut config = config(tmp.path(), &["true"]);
        config.cgroup_roots = vec![tmp.path().join("absent")];

        let err = run(&config, &NeverShutdown).unwrap_err();
        assert!(matches!(err, MemuseError::Scope(_)));
        // Output was opened first and closed by the guard, empty
        assert_eq!(fs::read_to_string(&config.output_path).unwrap(), "");
    }

    #[test]
    fn default_policy_refuses_plain_directory_roots() {
        let tmp = tempdir().unwrap();
        let mut config = config(tmp.path(), &["true"]);
        config.root_policy = RootPolicy::CgroupFsOnly;

        match run(&config, &NeverShutdown).unwrap_err() {
            MemuseError::Scope(msg) => {
                assert!(msg.contains("not a cgroup filesystem"), "{}", msg)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let root = &config.cgroup_roots[0];
        assert_eq!(fs::read_dir(root).unwrap().count(), 0);
    }

    #[test]
    fn invalid_config_is_rejected_before_any_side_effect() {
        let tmp = tempdir().unwrap();
        let mut config = config(tmp.path(), &["true"]);
        config.command.clear();

        assert!(matches!(
            run(&config, &NeverShutdown),
            Err(MemuseError::Config(_))
        ));
        assert!(!config.output_path.exists());
    }

    #[test]
    fn trace_without_counter_file_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut config = config(tmp.path(), &["sleep", "5"]);
        config.trace = true;

        let started = Instant::now();
        let err = run(&config, &NeverShutdown).unwrap_err();
        assert!(matches!(err, MemuseError::Sampling(_)));
        // The guard stopped the command instead of waiting it out
        assert!(started.elapsed().as_secs() < 5);
        assert_eq!(fs::read_to_string(&config.output_path).unwrap(), "");
    }

    #[test]
    fn requested_shutdown_stops_command() {
        let tmp = tempdir().unwrap();
        let config = config(tmp.path(), &["sleep", "30"]);
        let flag = AtomicBool::new(true);

        let summary = run(&config, &flag).unwrap();
        assert!(matches!(summary.exit, ChildExit::Signaled(_)));
        assert!(summary.was_interrupted());
        assert!(flag.load(Ordering::SeqCst));
        assert!(fs::read_to_string(&config.output_path)
            .unwrap()
            .ends_with("PEAK 0\n"));
    }
}

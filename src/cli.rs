use crate::config::env::{EnvSource, ProcessEnv};
use crate::config::types::{
    ProbeConfig, DEFAULT_SAMPLE_INTERVAL, INVOKING_GID_ENV, INVOKING_UID_ENV, TRACE_ENV,
};
use crate::core::RunSummary;
use crate::kernel::signal::SignalHandler;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit status for any fatal condition
const EXIT_FATAL: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "memuse",
    author,
    version,
    about = "Record the peak (and optionally the time series) memory use of a command",
    long_about = None
)]
pub struct ProbeArgs {
    /// Record interval samples as well as the final peak (same as setting MEM_TRACE)
    #[arg(long)]
    trace: bool,
    /// Sampling interval in milliseconds
    #[arg(
        long,
        value_name = "MS",
        default_value_t = DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval_ms: u64,
    /// Pause between counter reads inside an interval, in microseconds (0 = busy poll)
    #[arg(long, value_name = "US", default_value_t = 0)]
    poll_delay_us: u64,
    /// Cgroup root to try, in order; replaces the built-in candidates
    #[arg(long = "cgroup-root", value_name = "DIR")]
    cgroup_roots: Vec<PathBuf>,
    /// Write a JSON run summary here
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,
    /// File receiving the sample and PEAK lines (truncated)
    output_file: PathBuf,
    /// Command and arguments, run through /bin/sh -c
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl ProbeArgs {
    /// Merge parsed arguments with the environment
    pub fn into_config(self, env: &dyn EnvSource) -> ProbeConfig {
        let defaults = ProbeConfig::default();
        ProbeConfig {
            output_path: self.output_file,
            command: self.command,
            trace: self.trace || env.is_set(TRACE_ENV),
            sample_interval: Duration::from_millis(self.interval_ms),
            poll_delay: Duration::from_micros(self.poll_delay_us),
            cgroup_roots: if self.cgroup_roots.is_empty() {
                defaults.cgroup_roots
            } else {
                self.cgroup_roots
            },
            root_policy: defaults.root_policy,
            summary_path: self.summary,
            invoking_uid: env.id(INVOKING_UID_ENV),
            invoking_gid: env.id(INVOKING_GID_ENV),
        }
    }
}

/// Parse arguments, measure the command, and return the process exit code
pub fn run() -> Result<i32> {
    env_logger::init();

    let args = ProbeArgs::parse();

    if !nix::unistd::geteuid().is_root() {
        eprintln!("memuse needs root to create cgroups; try running it with sudo");
        return Ok(EXIT_FATAL);
    }

    let handler = SignalHandler::init().map_err(anyhow::Error::msg)?;
    let config = args.into_config(&ProcessEnv);
    log::debug!("Config: {:?}", config);

    let summary = match crate::core::run(&config, &handler) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("memuse: {}", e);
            return Ok(EXIT_FATAL);
        }
    };

    if let Some(path) = &config.summary_path {
        write_summary(path, &summary)?;
    }
    if !summary.teardown.is_clean() {
        for problem in &summary.teardown.errors {
            eprintln!("memuse: cleanup: {}", problem);
        }
    }
    if let Some(sig) = summary.interrupted_by {
        eprintln!("memuse: interrupted by signal {}", sig);
    }
    Ok(summary.exit_code())
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = summary.to_json()?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
    log::info!("Run summary written to {}", path.display());
    Ok(())
}

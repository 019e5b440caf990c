//! Integration tests for full runs on the host cgroup hierarchy
//!
//! Runs go through the default root list, so unified, hybrid and legacy
//! hosts are all exercised. The tests need root and a mounted memory
//! controller, and return early otherwise.

use memuse::core::run;
use memuse::kernel::cgroup::AccountingScope;
use memuse::kernel::signal::NeverShutdown;
use memuse::{ChildExit, ProbeConfig};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

/// True when some default root yields a scope with a live memory counter
fn memory_cgroup_available() -> bool {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: requires root");
        return false;
    }
    match AccountingScope::create(&ProbeConfig::default().cgroup_roots) {
        Ok(mut scope) => {
            assert!(scope.is_kernel_backed());
            assert!(scope.current_path().exists());
            assert!(scope.destroy());
            true
        }
        Err(e) => {
            eprintln!("skipping: {}", e);
            false
        }
    }
}

fn config(dir: &Path, command: &str) -> ProbeConfig {
    ProbeConfig {
        output_path: dir.join("out.txt"),
        command: command.split(' ').map(str::to_string).collect(),
        ..ProbeConfig::default()
    }
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn peak_of(lines: &[String]) -> u64 {
    let last = lines.last().expect("output has a PEAK line");
    last.strip_prefix("PEAK ")
        .expect("last line is PEAK")
        .parse()
        .unwrap()
}

#[test]
fn peak_covers_allocation_and_scope_is_removed() {
    if !memory_cgroup_available() {
        return;
    }
    let tmp = tempdir().unwrap();
    // dd faults in its whole 16 MiB block buffer
    let config = config(tmp.path(), "dd if=/dev/zero of=/dev/null bs=16M count=4");

    let summary = run(&config, &NeverShutdown).unwrap();
    assert_eq!(summary.exit, ChildExit::Exited(0));
    assert!(summary.teardown.is_clean(), "{:?}", summary.teardown);
    assert!(!summary.scope_path.exists());

    let out = lines(&config.output_path);
    assert_eq!(out.len(), 1, "untraced run writes only PEAK: {:?}", out);
    assert!(peak_of(&out) >= 16 * 1024 * 1024);
    assert_eq!(peak_of(&out), summary.peak_bytes);
    let roots = ProbeConfig::default().cgroup_roots;
    assert!(roots
        .iter()
        .any(|root| summary.scope_path.parent() == Some(root.as_path())));
}

#[test]
fn traced_run_writes_ordered_samples_then_peak() {
    if !memory_cgroup_available() {
        return;
    }
    let tmp = tempdir().unwrap();
    let mut config = config(tmp.path(), "sleep 0.3");
    config.trace = true;

    let summary = run(&config, &NeverShutdown).unwrap();
    let out = lines(&config.output_path);
    assert!(out.len() >= 4, "expected several samples: {:?}", out);
    assert_eq!(summary.samples as usize, out.len() - 1);

    let elapsed: Vec<u64> = out[..out.len() - 1]
        .iter()
        .map(|line| {
            let (us, bytes) = line.split_once(' ').unwrap();
            bytes.parse::<u64>().unwrap();
            us.parse().unwrap()
        })
        .collect();
    assert_eq!(elapsed[0], 0);
    assert!(elapsed.windows(2).all(|w| w[1] >= w[0]));
    // Boundaries are crossed just past each 50 ms multiple
    assert!(elapsed[1] > 50_000);
    assert!(elapsed[1] < 250_000);

    peak_of(&out);
    assert!(!summary.scope_path.exists());
}

#[test]
fn missing_command_is_observed_not_fatal() {
    if !memory_cgroup_available() {
        return;
    }
    let tmp = tempdir().unwrap();
    let config = config(tmp.path(), "/nonexistent/memuse-missing-command");

    let summary = run(&config, &NeverShutdown).unwrap();
    assert_eq!(summary.exit, ChildExit::Exited(127));
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(lines(&config.output_path).len(), 1);
    assert!(!summary.scope_path.exists());
}

#[test]
fn interrupt_stops_command_and_cleans_up() {
    if !memory_cgroup_available() {
        return;
    }
    let tmp = tempdir().unwrap();
    let mut config = config(tmp.path(), "sleep 30");
    config.trace = true;

    let flag = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&flag);
    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        trigger.store(true, Ordering::SeqCst);
    });

    let summary = run(&config, &*flag).unwrap();
    waker.join().unwrap();

    assert!(summary.was_interrupted());
    assert!(matches!(summary.exit, ChildExit::Signaled(_)));
    assert!(summary.wall_time_ms < 5_000);
    assert!(!summary.scope_path.exists());
    assert!(lines(&config.output_path)
        .last()
        .unwrap()
        .starts_with("PEAK "));
}

#[test]
fn detached_descendants_are_evicted() {
    if !memory_cgroup_available() {
        return;
    }
    let tmp = tempdir().unwrap();
    let config = config(tmp.path(), "sleep 30 & exit 0");

    let summary = run(&config, &NeverShutdown).unwrap();
    assert_eq!(summary.exit, ChildExit::Exited(0));
    assert!(summary.teardown.scope_removed);
    assert!(!summary.scope_path.exists());
}

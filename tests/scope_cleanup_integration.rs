//! Host check that runs never leave accounting directories behind
//!
//! Kept in its own test binary: scope names carry the pid, so the scan
//! below only sees directories created by this process.

use memuse::core::{measure_peak_with, run};
use memuse::kernel::cgroup::AccountingScope;
use memuse::kernel::signal::NeverShutdown;
use memuse::ProbeConfig;
use std::fs;
use std::path::Path;

fn own_scopes(root: &Path) -> Vec<String> {
    let marker = format!("_{}_", std::process::id());
    match fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("memuse_") && name.contains(&marker))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn no_scope_remains_under_any_default_root() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let defaults = ProbeConfig::default();
    if let Err(e) = AccountingScope::create(&defaults.cgroup_roots).map(|mut s| s.destroy()) {
        eprintln!("skipping: {}", e);
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let config = ProbeConfig {
        output_path: tmp.path().join("out.txt"),
        command: vec!["dd if=/dev/zero of=/dev/null bs=4M count=1".to_string()],
        ..ProbeConfig::default()
    };
    let summary = run(&config, &NeverShutdown).unwrap();
    assert!(summary.peak_bytes > 0);
    assert!(summary.teardown.is_clean(), "{:?}", summary.teardown);

    let (exit, peak) = measure_peak_with(&config, &NeverShutdown).unwrap();
    assert!(exit.success());
    assert!(peak > 0);

    for root in &defaults.cgroup_roots {
        let left = own_scopes(root);
        assert!(left.is_empty(), "left under {}: {:?}", root.display(), left);
    }
}

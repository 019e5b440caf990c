/// Cleanup and resource management
///
/// The guard owns every resource a run acquires (result file, accounting
/// scope, supervised command) and releases them in reverse acquisition
/// order: the command is stopped before its scope is removed, and the
/// result file is closed last. Teardown is idempotent and also runs on drop,
/// so early returns on the error path leave nothing behind.
use crate::config::types::{ChildExit, MemuseError, Result, TERMINATE_GRACE};
use crate::exec::CommandSupervisor;
use crate::kernel::cgroup::AccountingScope;
use crate::utils::output::ResultWriter;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What teardown did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Exit observed while stopping a command that was still running
    pub stopped_command: Option<ChildExit>,
    /// Scope directory is gone (or was never created)
    pub scope_removed: bool,
    /// Result file flushed and closed (or was never opened)
    pub output_closed: bool,
    pub errors: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.scope_removed && self.output_closed && self.errors.is_empty()
    }
}

/// Disjoint borrows of the acquired resources, for the measuring phase
pub struct RunParts<'a> {
    pub scope: &'a AccountingScope,
    pub command: &'a mut CommandSupervisor,
    pub writer: &'a mut ResultWriter,
}

pub struct LifecycleGuard {
    writer: Option<ResultWriter>,
    scope: Option<AccountingScope>,
    command: Option<CommandSupervisor>,
    grace: Duration,
    torn_down: bool,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::with_grace(TERMINATE_GRACE)
    }

    /// Guard with a custom SIGTERM-to-SIGKILL grace period
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            writer: None,
            scope: None,
            command: None,
            grace,
            torn_down: false,
        }
    }

    pub fn attach_writer(&mut self, writer: ResultWriter) {
        debug!("Guarding output file {}", writer.path().display());
        self.writer = Some(writer);
    }

    pub fn attach_scope(&mut self, scope: AccountingScope) {
        debug!("Guarding accounting scope {}", scope.path().display());
        self.scope = Some(scope);
    }

    pub fn attach_command(&mut self, command: CommandSupervisor) {
        debug!("Guarding command pid {}", command.pid());
        self.command = Some(command);
    }

    pub fn scope(&self) -> Option<&AccountingScope> {
        self.scope.as_ref()
    }

    pub fn command(&self) -> Option<&CommandSupervisor> {
        self.command.as_ref()
    }

    pub fn writer(&self) -> Option<&ResultWriter> {
        self.writer.as_ref()
    }

    /// Borrow all three resources at once; fails until each is attached
    pub fn parts_mut(&mut self) -> Result<RunParts<'_>> {
        match (
            self.scope.as_ref(),
            self.command.as_mut(),
            self.writer.as_mut(),
        ) {
            (Some(scope), Some(command), Some(writer)) => Ok(RunParts {
                scope,
                command,
                writer,
            }),
            _ => Err(MemuseError::Process(
                "run resources not fully acquired".to_string(),
            )),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release everything. The first call does the work; later calls return an empty report.
    pub fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            debug!("Teardown already performed");
            return TeardownReport {
                scope_removed: true,
                output_closed: true,
                ..TeardownReport::default()
            };
        }
        self.torn_down = true;

        let mut report = TeardownReport {
            scope_removed: true,
            output_closed: true,
            ..TeardownReport::default()
        };

        if let Some(mut command) = self.command.take() {
            if !command.is_reaped() {
                info!("Stopping command pid {} during teardown", command.pid());
                match command.terminate(self.grace) {
                    Ok(exit) => report.stopped_command = Some(exit),
                    Err(e) => {
                        let msg = format!("Failed to stop command pid {}: {}", command.pid(), e);
                        warn!("{}", msg);
                        report.errors.push(msg);
                        // Last attempt so the command is not left a zombie
                        match command.kill_and_reap() {
                            Ok(exit) => report.stopped_command = Some(exit),
                            Err(e) => {
                                let msg =
                                    format!("Failed to reap command pid {}: {}", command.pid(), e);
                                warn!("{}", msg);
                                report.errors.push(msg);
                            }
                        }
                    }
                }
            }
        }

        if let Some(mut scope) = self.scope.take() {
            if !scope.destroy() {
                report.scope_removed = false;
                report.errors.push(format!(
                    "accounting scope {} left behind",
                    scope.path().display()
                ));
            }
        }

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                warn!("{}", e);
                report.output_closed = false;
                report.errors.push(e.to_string());
            }
        }

        if report.errors.is_empty() {
            debug!("Teardown complete");
        } else {
            warn!("Teardown finished with {} error(s)", report.errors.len());
        }
        report
    }
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

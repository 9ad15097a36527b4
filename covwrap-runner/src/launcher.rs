use chrono::Utc;
use covwrap_core::{CommandLine, CovwrapError, Result, RunOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// Upper bound on any spawned child (2^31 - 1 milliseconds)
const CHILD_TIMEOUT_MS: u64 = i32::MAX as u64;

/// Spawns rewritten commands as foreground children
#[derive(Clone)]
pub struct ProcessLauncher {
    cwd: PathBuf,
}

impl ProcessLauncher {
    pub fn new<P: AsRef<Path>>(cwd: P) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    /// Spawn a child inheriting this process's standard streams and wait
    /// for it to exit.
    pub async fn run_foreground(&self, cmd: &CommandLine) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let start = std::time::Instant::now();

        info!(program = %cmd.program, "Spawning foreground child");

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .current_dir(&self.cwd)
            .spawn()
            .map_err(|source| CovwrapError::SpawnFailed {
                program: cmd.program.clone(),
                source,
            })?;

        let status = match timeout(Duration::from_millis(CHILD_TIMEOUT_MS), child.wait()).await {
            Ok(waited) => waited?,
            Err(_) => {
                let _ = child.start_kill();
                return Err(CovwrapError::ChildTimedOut {
                    program: cmd.program.clone(),
                });
            }
        };

        // Treat signal death as a generic failure
        let exit_code = status.code().unwrap_or(1);
        let completed_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            program = %cmd.program,
            exit_code,
            duration_ms,
            "Foreground child exited"
        );

        Ok(RunOutcome {
            exit_code,
            duration_ms,
            started_at,
            completed_at,
        })
    }

    /// Run invocations in order, stopping at the first non-zero exit
    pub async fn run_all(&self, cmds: &[CommandLine]) -> Result<RunOutcome> {
        let mut last = RunOutcome {
            exit_code: 0,
            duration_ms: 0,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };

        for cmd in cmds {
            last = self.run_foreground(cmd).await?;
            if !last.success() {
                warn!(
                    program = %cmd.program,
                    exit_code = last.exit_code,
                    "Child failed, skipping remaining invocations"
                );
                break;
            }
        }

        Ok(last)
    }
}

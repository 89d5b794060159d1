//! Worker process supervision.
//!
//! The agent's primary process starts a fixed number of worker processes and
//! keeps them running: a worker that exits with a failure is replaced right
//! away, one that exits cleanly is not. On shutdown every worker receives
//! SIGTERM and the supervisor waits for all of them.

use super::AgentError;
use std::path::PathBuf;
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hidden flag that turns the binary into a worker process.
pub const WORKER_FLAG: &str = "--worker";

/// Number of worker processes for `requested` concurrency.
///
/// One CPU is left to the primary process; at least one worker always runs.
pub fn worker_count(available_cpus: usize, requested: usize) -> usize {
    available_cpus.saturating_sub(1).min(requested).max(1)
}

/// CPUs available to this process.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Command line that starts one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary with `args`.
    pub fn current_exe(args: Vec<String>) -> Result<Self, AgentError> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

/// Totals over the supervisor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub started: u64,
    /// Workers replaced after a failed exit
    pub restarts: u64,
}

impl std::ops::AddAssign for SupervisorStats {
    fn add_assign(&mut self, other: Self) {
        self.started += other.started;
        self.restarts += other.restarts;
    }
}

/// Keeps a pool of worker processes alive until cancelled.
#[derive(Debug)]
pub struct Supervisor {
    command: WorkerCommand,
    workers: usize,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(command: WorkerCommand, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            command,
            workers,
            cancel,
        }
    }

    /// Run all worker slots until they finish or the token is cancelled.
    ///
    /// Returns the first slot error after every slot has stopped.
    pub async fn run(&self) -> Result<SupervisorStats, AgentError> {
        info!("Starting {} workers", self.workers);

        let mut slots = JoinSet::new();
        for slot in 0..self.workers {
            slots.spawn(supervise(slot, self.command.clone(), self.cancel.clone()));
        }

        let mut stats = SupervisorStats::default();
        let mut first_error = None;
        while let Some(joined) = slots.join_next().await {
            match joined {
                Ok(Ok(slot_stats)) => stats += slot_stats,
                Ok(Err(e)) => {
                    error!(error = %e, "Worker slot failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(AgentError::Task(e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

async fn supervise(
    slot: usize,
    command: WorkerCommand,
    cancel: CancellationToken,
) -> Result<SupervisorStats, AgentError> {
    let mut stats = SupervisorStats::default();

    loop {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(AgentError::Spawn)?;
        stats.started += 1;

        let pid = child.id();
        debug!(slot, pid, "Worker with pid {:?} started", pid);

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                terminate(&mut child);
                child.wait().await?
            }
        };

        debug!(
            slot,
            pid,
            code = ?status.code(),
            "Worker with pid {:?} stopped",
            pid
        );

        if cancel.is_cancelled() || status.success() {
            return Ok(stats);
        }

        warn!(slot, code = ?status.code(), "Worker was stopped unexpectedly, starting a new one");
        stats.restarts += 1;
    }
}

/// Ask a worker to finish its current job and exit.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid is a child of this process that has not been reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

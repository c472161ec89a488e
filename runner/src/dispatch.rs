use crate::{
    config::SweepConfig,
    database::{sqlite::GridStore, StoreError},
    queue::{self, ClaimedCell, QueueError},
};
use std::{
    path::Path,
    process::Command,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_unwrap::ResultExt;
use wait_timeout::ChildExt;

const CLAIM_ATTEMPTS: u32 = 3;
const CLAIM_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to run submit command: {0}")]
    Submission(std::io::Error),
    #[error("Submit command timed out after {0:?}")]
    SubmissionTimeout(Duration),
    #[error("Work queue failure: {0}")]
    Queue(#[from] QueueError),
    #[error("Failed to open grid store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone)]
/// Claims cells and hands them to the external job-submission command.
///
/// A cell counts as processed once submission was invoked; the submitted
/// job's own outcome is observed out-of-band and never inspected here.
pub struct Dispatcher {
    command: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(config: &SweepConfig, command: String, extra_args: Vec<String>) -> Self {
        let mut args = config.submit.args.clone();
        args.extend(extra_args);

        Self {
            command,
            args,
            timeout: config.submit.timeout.map(Duration::from_secs),
        }
    }

    /// Fixed arguments first, then one `--<name> <value>` pair per parameter.
    pub fn build_args(&self, cell: &ClaimedCell) -> Vec<String> {
        let mut args = self.args.clone();

        for (name, value) in &cell.params {
            args.push(format!("--{name}"));
            args.push(value.to_string());
        }

        args
    }

    fn submit(&self, cell: &ClaimedCell) -> Result<(), DispatchError> {
        let args = self.build_args(cell);
        debug!(id = cell.id, command = %self.command, ?args, "Submitting cell");

        let mut child = Command::new(&self.command)
            .args(&args)
            .spawn()
            .map_err(DispatchError::Submission)?;

        match self.timeout {
            Some(timeout) => match child
                .wait_timeout(timeout)
                .map_err(DispatchError::Submission)?
            {
                Some(status) => {
                    debug!(id = cell.id, success = status.success(), "Submit command returned");
                }
                None => {
                    child.kill().map_err(DispatchError::Submission)?;
                    child.wait().unwrap_or_log();

                    return Err(DispatchError::SubmissionTimeout(timeout));
                }
            },
            None => {
                let status = child.wait().map_err(DispatchError::Submission)?;
                debug!(id = cell.id, success = status.success(), "Submit command returned");
            }
        }

        Ok(())
    }

    /// Claim one cell, submit it and finalize it.
    ///
    /// Returns `Ok(false)` once the queue is exhausted. The cell is finalized
    /// even when submission fails, matching the contract that completion is
    /// recorded at submission time rather than at job success.
    pub fn run_once(&self, store: &mut GridStore) -> Result<bool, DispatchError> {
        let Some(cell) = claim_with_retry(store)? else {
            info!("No pending cells remain");

            return Ok(false);
        };

        info!(id = cell.id, "Claimed cell");

        let submission = self.submit(&cell);

        let finalized = queue::finalize(store, cell.id)?;
        debug!(id = cell.id, finalized, "Finalized cell");

        submission?;

        Ok(true)
    }

    /// Keep claiming until the queue is drained; submission failures are
    /// logged and do not stop the loop.
    pub fn drain(&self, store: &mut GridStore) -> Result<u64, DispatchError> {
        let mut completed = 0;

        loop {
            match self.run_once(store) {
                Ok(true) => completed += 1,
                Ok(false) => break,
                Err(error @ (DispatchError::Submission(_) | DispatchError::SubmissionTimeout(_))) => {
                    completed += 1;
                    error!(error = %error, "Submission failed, cell stays finalized");
                }
                Err(error) => return Err(error),
            }
        }

        info!(completed, "Drained work queue");

        Ok(completed)
    }

    /// Drain with a pool of workers, each owning its own store connection.
    /// The database stays the only coordination point between workers.
    /// `workers = 0` uses one worker per CPU.
    pub fn drain_parallel(
        &self,
        path: &Path,
        columns: &[String],
        workers: usize,
    ) -> Result<u64, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()?;
        let completed = AtomicU64::new(0);

        pool.broadcast(|context| {
            let mut store = match GridStore::open(path, columns.to_vec()) {
                Ok(store) => store,
                Err(error) => {
                    error!(worker = context.index(), error = %error, "Worker failed to open the grid store");

                    return;
                }
            };

            match self.drain(&mut store) {
                Ok(count) => {
                    completed.fetch_add(count, Ordering::SeqCst);
                }
                Err(error) => error!(worker = context.index(), error = %error, "Worker aborted"),
            }
        });

        Ok(completed.into_inner())
    }
}

fn claim_with_retry(store: &mut GridStore) -> Result<Option<ClaimedCell>, QueueError> {
    let mut attempt = 0;

    loop {
        match queue::claim_next(store) {
            Ok(cell) => return Ok(cell),
            Err(error) => {
                attempt += 1;

                if attempt == CLAIM_ATTEMPTS {
                    return Err(error);
                }

                warn!(error = %error, attempt, "Claim failed, retrying");
                thread::sleep(CLAIM_BACKOFF);
            }
        }
    }
}

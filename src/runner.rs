//! One worker thread's control loop: claim a ready job, run it through the
//! retry wrapper, record the outcome, repeat. An unexpected error anywhere in
//! this loop (as opposed to inside the child the executor spawned, which is
//! already captured as a `JobResult`) is batch-fatal: it gets logged and the
//! shared cancellation flag is set so the supervisor tears the whole batch
//! down.

use db::Db;
use error_helpers;
use errors::*;
use model::JobResult;
use retry;

use slog::Logger;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct Runner {
    pub db:              Arc<Db>,
    pub connection_str:  String,
    pub tool_dir:        PathBuf,
    pub cancel:          Arc<AtomicBool>,
}

impl Runner {
    pub fn run(&self, log: &Logger) {
        while !self.cancel.load(Ordering::SeqCst) {
            if let Err(e) = self.run_one_iteration(log) {
                error_helpers::print_error(log, &e);
                let message = error_strings(&e).join(": ");
                if let Err(log_err) = self.db.log_batch_error(&message) {
                    error_helpers::print_error(log, &log_err);
                }
                self.cancel.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    fn run_one_iteration(&self, log: &Logger) -> Result<()> {
        let job = match self.db.get_ready_job(log)? {
            Some(job) => job,
            None => return Ok(()),
        };

        let log = log.new(o!("job_id" => job.job_id, "task" => job.task.name.clone()));
        info!(log, "Starting job");

        let result = retry::run_job_with_retry(&log, &job, &self.connection_str, &self.tool_dir);

        match result {
            JobResult::Success { execution_millis, .. } => {
                info!(log, "Job completed successfully"; "execution_millis" => execution_millis);
            }
            JobResult::Error { ref error_message, .. } => {
                info!(log, "Job failed"; "error_message" => error_message.as_str());
            }
        }

        self.db.log_job_result(&job, &result)
    }
}

#[cfg(test)]
mod tests {
    // `Runner::run_one_iteration` talks to the database through `Db`, so its
    // behavior is covered by the `#[ignore]`d integration tests in
    // `tests/runner.rs` rather than here.
}

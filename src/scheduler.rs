//! The single control loop that periodically invokes the database's
//! maintenance procedures: queue materialization, task-issue recomputation,
//! and log retention, each on its own configured cadence.

use db::Db;
use error_helpers;
use errors::*;

use slog::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct Scheduler {
    pub db:                                  Arc<Db>,
    pub seconds_between_updates:             u64,
    pub seconds_between_cleanups:            u64,
    pub seconds_between_task_issue_updates:  u64,
    pub cancel:                              Arc<AtomicBool>,
}

impl Scheduler {
    pub fn run(&self, log: &Logger) {
        if let Err(e) = self.run_startup_pass(log) {
            self.fail(log, &e);
            return;
        }

        let mut last_cleanup = Instant::now();
        let mut last_task_issues_update = Instant::now();
        let mut last_queue_update = Instant::now();

        while !self.cancel.load(Ordering::SeqCst) {
            if let Err(e) = self.run_one_iteration(
                log,
                &mut last_cleanup,
                &mut last_task_issues_update,
                &mut last_queue_update,
            ) {
                self.fail(log, &e);
                return;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    fn run_startup_pass(&self, log: &Logger) -> Result<()> {
        info!(log, "Running startup maintenance pass");
        self.db.delete_old_logs(log)?;
        self.db.update_task_issues(log)?;
        self.db.update_queue(log)?;
        Ok(())
    }

    fn run_one_iteration(
        &self,
        log: &Logger,
        last_cleanup: &mut Instant,
        last_task_issues_update: &mut Instant,
        last_queue_update: &mut Instant,
    ) -> Result<()> {
        if last_cleanup.elapsed() >= Duration::from_secs(self.seconds_between_cleanups) {
            self.db.delete_old_logs(log)?;
            *last_cleanup = Instant::now();
        }
        if last_task_issues_update.elapsed() >= Duration::from_secs(self.seconds_between_task_issue_updates) {
            self.db.update_task_issues(log)?;
            *last_task_issues_update = Instant::now();
        }
        if last_queue_update.elapsed() >= Duration::from_secs(self.seconds_between_updates) {
            self.db.update_queue(log)?;
            *last_queue_update = Instant::now();
        }
        Ok(())
    }

    fn fail(&self, log: &Logger, e: &Error) {
        error_helpers::print_error(log, e);
        let message = error_strings(e).join(": ");
        if let Err(log_err) = self.db.log_batch_error(&message) {
            error_helpers::print_error(log, &log_err);
        }
        self.cancel.store(true, Ordering::SeqCst);
    }
}

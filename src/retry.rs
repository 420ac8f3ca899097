//! Turns a single-attempt executor into a retry-bounded one.
//!
//! Attempt 0 is the first execution. After attempt `k`, if the result is an
//! error (or the attempt itself panicked) and `k < task.retries`, attempt
//! `k + 1` runs; otherwise the last result is returned as-is. A panicking
//! attempt that has exhausted its retries is turned into a synthetic
//! `JobResult::error(-1, ...)`, mirroring the original's catch of any
//! exception raised mid-attempt.

use model::{Job, JobResult};

use slog::Logger;
use std::panic;
use std::path::Path;

pub fn run_with_retry<F>(log: &Logger, job: &Job, attempt: F) -> JobResult
where
    F: Fn(&Logger, &Job, i32) -> JobResult,
{
    let max_retries = job.task.retries;
    let mut retries_so_far = 0;

    loop {
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| attempt(log, job, retries_so_far)));

        match result {
            Ok(job_result) => {
                if job_result.is_err() && retries_so_far < max_retries {
                    info!(log, "Retrying job"; "task" => &job.task.name, "attempt" => retries_so_far + 1, "max_retries" => max_retries);
                    retries_so_far += 1;
                    continue;
                }
                return job_result;
            }
            Err(panic_payload) => {
                if retries_so_far < max_retries {
                    info!(log, "Retrying job after panic"; "task" => &job.task.name, "attempt" => retries_so_far + 1, "max_retries" => max_retries);
                    retries_so_far += 1;
                    continue;
                }
                let message = panic_message(&panic_payload);
                return JobResult::error(-1, message, retries_so_far);
            }
        }
    }
}

/// Convenience wrapper binding `executor::run_attempt`'s extra parameters so
/// callers in `runner.rs` only have to supply `(log, job)`.
pub fn run_job_with_retry(log: &Logger, job: &Job, connection_str: &str, tool_dir: &Path) -> JobResult {
    run_with_retry(log, job, |log, job, retries_so_far| {
        ::executor::run_attempt(log, job, connection_str, tool_dir, retries_so_far)
    })
}

fn panic_message(payload: &Box<::std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job attempt panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use model::{Job, JobResult, Task};
    use retry::*;
    use slog::Logger;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_log() -> Logger {
        ::slog::Logger::root(::slog::Discard, o!())
    }

    fn test_job(retries: i32) -> Job {
        Job {
            job_id:   1,
            batch_id: 1,
            task:     Task::sql(1, "t1", Some(60), retries, "select 1").unwrap(),
        }
    }

    #[test]
    fn test_succeeds_on_first_attempt_without_retry() {
        let job = test_job(3);
        let calls = AtomicUsize::new(0);
        let result = run_with_retry(&test_log(), &job, |_log, _job, retries_so_far| {
            calls.fetch_add(1, Ordering::SeqCst);
            JobResult::success(10, retries_so_far)
        });
        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(!result.is_err());
        assert_eq!(0, result.retries());
    }

    #[test]
    fn test_retries_until_success() {
        let job = test_job(5);
        let calls = Cell::new(0);
        let result = run_with_retry(&test_log(), &job, |_log, _job, retries_so_far| {
            let n = calls.get();
            calls.set(n + 1);
            if n < 2 {
                JobResult::error(1, "boom".to_owned(), retries_so_far)
            } else {
                JobResult::success(10, retries_so_far)
            }
        });
        assert_eq!(3, calls.get());
        assert!(!result.is_err());
        assert_eq!(2, result.retries());
    }

    #[test]
    fn test_exhausts_retries_and_returns_last_error() {
        let job = test_job(2);
        let calls = Cell::new(0);
        let result = run_with_retry(&test_log(), &job, |_log, _job, retries_so_far| {
            calls.set(calls.get() + 1);
            JobResult::error(7, "still broken".to_owned(), retries_so_far)
        });
        assert_eq!(3, calls.get());
        assert!(result.is_err());
        assert_eq!(2, result.retries());
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let job = test_job(0);
        let calls = Cell::new(0);
        let result = run_with_retry(&test_log(), &job, |_log, _job, retries_so_far| {
            calls.set(calls.get() + 1);
            JobResult::error(1, "nope".to_owned(), retries_so_far)
        });
        assert_eq!(1, calls.get());
        assert_eq!(0, result.retries());
    }
}

//! Top-level lifecycle: opens the pool, opens a batch, launches the
//! scheduler and runner threads, watches the shared cancellation flag, and
//! wraps the whole thing in a crash-restart loop with backoff. Ctrl-C is
//! handled distinctly from an internal fatal: the former exits cleanly with
//! a user-attributed log line, the latter restarts after
//! `seconds_between_retries`.

use config::Config;
use db::{self, Db};
use error_helpers;
use errors::*;
use runner::Runner;
use scheduler::Scheduler;

use diesel::pg::PgConnection;
use r2d2::Pool;
use r2d2_diesel::ConnectionManager;
use slog::Logger;
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const IDLE_TIMEOUT_SECONDS: u64 = 10;
const POOL_TIMEOUT_SECONDS: u64 = 10;

/// Bounds a `--once` attempt so it terminates even if nothing ever sets
/// `cancel`. Purely a CLI convenience for local/manual runs; the normal
/// `run` subcommand has no such bound.
const ONCE_ATTEMPT_SECONDS: u64 = 30;

enum BatchOutcome {
    UserShutdown,
    Completed,
}

/// Runs batches forever, restarting with backoff on any non-user fatal.
/// Returns the process exit code.
pub fn run_forever(log: &Logger, config: &Config, tool_dir: &Path) -> i32 {
    let user_shutdown = install_shutdown_handler(log);

    loop {
        match run_batch(log, config, tool_dir, &user_shutdown, None) {
            Ok(BatchOutcome::UserShutdown) => return 0,
            Ok(BatchOutcome::Completed) => {
                if user_shutdown.load(Ordering::SeqCst) {
                    return 0;
                }
            }
            Err(e) => {
                error_helpers::print_error(log, &e);
            }
        }

        if user_shutdown.load(Ordering::SeqCst) {
            return 0;
        }

        error!(log, "ppe exited abnormally, restarting"; "seconds" => config.seconds_between_retries);
        thread::sleep(Duration::from_secs(config.seconds_between_retries));
    }
}

/// Runs exactly one supervisor attempt, bounded by `ONCE_ATTEMPT_SECONDS`,
/// with no outer restart loop. Intended for local/manual invocations.
pub fn run_once(log: &Logger, config: &Config, tool_dir: &Path) -> i32 {
    let user_shutdown = install_shutdown_handler(log);

    match run_batch(log, config, tool_dir, &user_shutdown, Some(Duration::from_secs(ONCE_ATTEMPT_SECONDS))) {
        Ok(_) => 0,
        Err(e) => {
            error_helpers::print_error(log, &e);
            1
        }
    }
}

fn install_shutdown_handler(log: &Logger) -> Arc<AtomicBool> {
    let user_shutdown = Arc::new(AtomicBool::new(false));
    let flag = user_shutdown.clone();
    let handler_log = log.clone();
    if let Err(e) = ::ctrlc::set_handler(move || {
        info!(handler_log, "Received interrupt, shutting down");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(log, "Failed to install Ctrl-C handler"; "error" => e.to_string());
    }
    user_shutdown
}

fn run_batch(
    log: &Logger,
    config: &Config,
    tool_dir: &Path,
    user_shutdown: &Arc<AtomicBool>,
    bound: Option<Duration>,
) -> Result<BatchOutcome> {
    let pool = build_pool(log, &config.connection_string, config.max_connections)?;

    let batch_id = db::create_batch(&pool)?;
    let log = log.new(o!("batch_id" => batch_id));
    info!(log, "Opened new batch");

    let db = Arc::new(Db::new(pool, batch_id, config.days_logs_to_keep));

    // From here on, any fatal error must be written back to the batch's own
    // log before it propagates -- mirroring the original's `except Exception
    // as e: ...; db.log_batch_error(...); raise` around the whole body below
    // this point.
    let result = run_batch_body(&log, config, tool_dir, user_shutdown, bound, &db);
    if let Err(ref e) = result {
        let message = error_strings(e).join(": ");
        if let Err(log_err) = db.log_batch_error(&message) {
            error_helpers::print_error(&log, &log_err);
        }
    }

    // `pool` (owned by `db`, which is dropped here as its last `Arc` goes out
    // of scope) is fully released before `run_forever` can open a new one.
    result
}

fn run_batch_body(
    log: &Logger,
    config: &Config,
    tool_dir: &Path,
    user_shutdown: &Arc<AtomicBool>,
    bound: Option<Duration>,
    db: &Arc<Db>,
) -> Result<BatchOutcome> {
    db.log_batch_info("batch started")?;
    db.cancel_running_jobs("A new batch was started.")?;

    let cancel = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();

    let scheduler = Scheduler {
        db:                                 db.clone(),
        seconds_between_updates:            config.seconds_between_updates,
        seconds_between_cleanups:           config.seconds_between_cleanups,
        seconds_between_task_issue_updates: config.seconds_between_task_issue_updates,
        cancel:                             cancel.clone(),
    };
    let scheduler_log = log.new(o!("thread" => "scheduler"));
    handles.push(
        thread::Builder::new()
            .name("scheduler".to_owned())
            .spawn(move || scheduler.run(&scheduler_log))
            .map_err(Error::from)?,
    );

    for i in 0..config.max_simultaneous_jobs {
        let runner = Runner {
            db:             db.clone(),
            connection_str: config.connection_string.clone(),
            tool_dir:       tool_dir.to_path_buf(),
            cancel:         cancel.clone(),
        };
        let name = thread_name(i);
        let runner_log = log.new(o!("thread" => name.clone()));
        handles.push(
            thread::Builder::new()
                .name(name)
                .spawn(move || runner.run(&runner_log))
                .map_err(Error::from)?,
        );
    }

    let started_at = Instant::now();
    let outcome = loop {
        if user_shutdown.load(Ordering::SeqCst) {
            cancel.store(true, Ordering::SeqCst);
            break BatchOutcome::UserShutdown;
        }
        if cancel.load(Ordering::SeqCst) {
            break BatchOutcome::Completed;
        }
        if let Some(bound) = bound {
            if started_at.elapsed() >= bound {
                cancel.store(true, Ordering::SeqCst);
                break BatchOutcome::Completed;
            }
        }
        thread::sleep(Duration::from_secs(1));
    };

    for handle in handles {
        let _ = handle.join();
    }

    if let BatchOutcome::UserShutdown = outcome {
        let user = env::var("USER").unwrap_or_else(|_| "Unknown".to_owned());
        db.log_batch_info(&format!("ppe exited at the request of the user, {}", user))?;
    }

    Ok(outcome)
}

fn build_pool(log: &Logger, connection_str: &str, max_connections: u32) -> Result<Pool<ConnectionManager<PgConnection>>> {
    debug!(log, "Initializing connection pool"; "max_connections" => max_connections);

    let manager = ConnectionManager::<PgConnection>::new(connection_str);
    Pool::builder()
        .connection_timeout(Duration::from_secs(POOL_TIMEOUT_SECONDS))
        .idle_timeout(Some(Duration::from_secs(IDLE_TIMEOUT_SECONDS)))
        .max_size(max_connections)
        .min_idle(Some(0))
        .build(manager)
        .map_err(Error::from)
}

fn thread_name(n: u32) -> String {
    format!("runner_{:03}", n)
}

#[cfg(test)]
mod tests {
    use supervisor::*;

    #[test]
    fn test_thread_name() {
        assert_eq!("runner_000", thread_name(0));
        assert_eq!("runner_015", thread_name(15));
        assert_eq!("runner_100", thread_name(100));
    }
}

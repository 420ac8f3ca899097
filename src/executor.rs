//! Runs one job attempt as an isolated child process and enforces its
//! timeout. Every code path here returns a `JobResult`, never a propagated
//! `Error` -- an executor failure (tool missing, nonzero exit, timeout) is
//! itself the outcome of the attempt, and the retry wrapper decides whether
//! it's eligible to run again.

use errors::*;
use model::{Job, JobResult, TaskVariant};

use diesel::connection::Connection;
use diesel::pg::PgConnection;
use slog::Logger;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Argument that selects the hidden internal subcommand `ppe` re-execs itself
/// with to run a `SqlTask`'s statement inside a genuine child process, giving
/// it the same subprocess + timeout + kill code path as a `CommandLineTask`.
pub const INTERNAL_RUN_SQL_ARG: &str = "__internal-run-sql";

/// Runs a single attempt of `job`, embedding `retries_so_far` into whatever
/// `JobResult` it returns -- the retry wrapper never has to patch it in
/// after the fact.
pub fn run_attempt(
    log: &Logger,
    job: &Job,
    connection_str: &str,
    tool_dir: &Path,
    retries_so_far: i32,
) -> JobResult {
    let task = &job.task;
    match task.variant {
        TaskVariant::Sql { ref sql } => run_sql(log, task.timeout_seconds, &task.name, connection_str, sql, retries_so_far),
        TaskVariant::CommandLine { ref tool, ref tool_args } => {
            run_command_line(log, task.timeout_seconds, &task.name, tool_dir, tool, tool_args.as_ref(), retries_so_far)
        }
        TaskVariant::CondaProject { .. } => {
            let e: Error = ErrorKind::UnsupportedTaskVariant(task.variant_name().to_owned()).into();
            JobResult::error(-1, error_strings(&e).join(": "), retries_so_far)
        }
    }
}

/// Resolves `tool` against `tool_dir`, trying a flat layout first and then a
/// one-level-nested-by-stem layout, matching `spec.md`'s probe order.
pub fn resolve_tool_path(tool_dir: &Path, tool: &str) -> Result<PathBuf> {
    let flat = tool_dir.join(tool);
    if flat.is_file() {
        return Ok(flat);
    }

    let stem = Path::new(tool)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(tool);
    let nested = tool_dir.join(stem).join(tool);
    if nested.is_file() {
        return Ok(nested);
    }

    Err(ErrorKind::ToolNotFound(
        tool.to_owned(),
        vec![flat.display().to_string(), nested.display().to_string()],
    ).into())
}

fn run_command_line(
    log: &Logger,
    timeout_seconds: Option<i64>,
    task_name: &str,
    tool_dir: &Path,
    tool: &str,
    tool_args: Option<&Vec<String>>,
    retries_so_far: i32,
) -> JobResult {
    let path = match resolve_tool_path(tool_dir, tool) {
        Ok(path) => path,
        Err(e) => return JobResult::error(-1, error_strings(&e).join(": "), retries_so_far),
    };

    let mut cmd = Command::new(&path);
    if let Some(args) = tool_args {
        cmd.args(args);
    }
    if let Some(parent) = path.parent() {
        cmd.current_dir(parent);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return JobResult::error(-1, e.to_string(), retries_so_far),
    };

    match wait_for_child(log, &mut child, timeout_seconds, task_name) {
        WaitOutcome::TimedOut => JobResult::timeout(task_name, timeout_seconds.unwrap_or(0), retries_so_far),
        WaitOutcome::Exited(status) => {
            let execution_millis = elapsed_millis(start);
            if status.success() {
                JobResult::success(execution_millis, retries_so_far)
            } else {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                let code = status.code().unwrap_or(-1);
                let message = if stderr.is_empty() {
                    format!("[{}] exited with status {}", task_name, code)
                } else {
                    stderr
                };
                JobResult::error(code, message, retries_so_far)
            }
        }
        WaitOutcome::Failed(e) => JobResult::error(-1, e.to_string(), retries_so_far),
    }
}

/// Dispatches a `SqlTask`'s statement to a child process running this same
/// binary under `__internal-run-sql`, so SQL execution gets the identical
/// subprocess-isolation and timeout-kill treatment as a command-line task.
fn run_sql(
    log: &Logger,
    timeout_seconds: Option<i64>,
    task_name: &str,
    connection_str: &str,
    sql: &str,
    retries_so_far: i32,
) -> JobResult {
    let current_exe = match ::std::env::current_exe() {
        Ok(path) => path,
        Err(e) => return JobResult::error(-1, e.to_string(), retries_so_far),
    };

    let mut cmd = Command::new(current_exe);
    cmd.arg(INTERNAL_RUN_SQL_ARG)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return JobResult::error(-1, e.to_string(), retries_so_far),
    };

    // The connection string never appears in argv (it's typically a DSN with
    // an embedded password, and argv is visible to any local user via `ps`);
    // it travels over stdin instead, on its own first line, with the SQL
    // statement making up the rest of the stream.
    if let Some(mut stdin) = child.stdin.take() {
        let write_result = stdin
            .write_all(connection_str.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.write_all(sql.as_bytes()));
        if let Err(e) = write_result {
            return JobResult::error(-1, e.to_string(), retries_so_far);
        }
    }

    match wait_for_child(log, &mut child, timeout_seconds, task_name) {
        WaitOutcome::TimedOut => JobResult::timeout(task_name, timeout_seconds.unwrap_or(0), retries_so_far),
        WaitOutcome::Exited(status) => {
            let execution_millis = elapsed_millis(start);
            if status.success() {
                JobResult::success(execution_millis, retries_so_far)
            } else {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                let code = status.code().unwrap_or(-1);
                let message = if stderr.is_empty() {
                    format!("[{}] sql statement failed with status {}", task_name, code)
                } else {
                    stderr
                };
                JobResult::error(code, message, retries_so_far)
            }
        }
        WaitOutcome::Failed(e) => JobResult::error(-1, e.to_string(), retries_so_far),
    }
}

enum WaitOutcome {
    Exited(::std::process::ExitStatus),
    TimedOut,
    Failed(::std::io::Error),
}

/// The timeout invariant: the parent never trusts the child, and a timed-out
/// child is always killed and reaped before this function returns.
fn wait_for_child(
    log: &Logger,
    child: &mut ::std::process::Child,
    timeout_seconds: Option<i64>,
    task_name: &str,
) -> WaitOutcome {
    match timeout_seconds {
        None => match child.wait() {
            Ok(status) => WaitOutcome::Exited(status),
            Err(e) => WaitOutcome::Failed(e),
        },
        Some(seconds) => {
            let duration = Duration::from_secs(seconds.max(0) as u64);
            match child.wait_timeout(duration) {
                Ok(Some(status)) => WaitOutcome::Exited(status),
                Ok(None) => {
                    warn!(log, "Job exceeded its timeout, killing child"; "task" => task_name, "timeout_seconds" => seconds);
                    if let Err(e) = child.kill() {
                        error!(log, "Failed to kill timed-out child"; "error" => e.to_string());
                    }
                    let _ = child.wait();
                    WaitOutcome::TimedOut
                }
                Err(e) => WaitOutcome::Failed(e),
            }
        }
    }
}

fn elapsed_millis(start: Instant) -> i64 {
    let elapsed = start.elapsed();
    (elapsed.as_secs() as i64) * 1000 + (i64::from(elapsed.subsec_nanos()) / 1_000_000)
}

/// The actual body of the `__internal-run-sql` subcommand: opens a fresh,
/// non-pooled connection and runs one autocommit statement. Invoked from
/// `bin/ppe/main.rs` in the re-exec'd child, never from within a runner
/// thread directly.
pub fn run_internal_sql(connection_str: &str, sql: &str) -> Result<()> {
    let conn = PgConnection::establish(connection_str)?;
    conn.execute(sql)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use executor::*;
    use model::{Job, JobResult, Task};

    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Instant;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = ::std::env::temp_dir().join(format!("ppe-executor-test-{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_script(dir: &PathBuf, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }

    fn test_log() -> ::slog::Logger {
        ::slog::Logger::root(::slog::Discard, o!())
    }

    fn command_line_job(timeout_seconds: Option<i64>, tool: &str) -> Job {
        Job {
            job_id:   1,
            batch_id: 1,
            task:     Task::command_line(1, "t1", timeout_seconds, 0, tool, None).unwrap(),
        }
    }

    #[test]
    fn test_resolve_tool_path_flat() {
        let dir = tmp_dir("flat");
        fs::write(dir.join("tool.sh"), "#!/bin/sh\n").unwrap();
        let resolved = resolve_tool_path(&dir, "tool.sh").unwrap();
        assert_eq!(dir.join("tool.sh"), resolved);
    }

    #[test]
    fn test_resolve_tool_path_nested() {
        let dir = tmp_dir("nested");
        fs::create_dir_all(dir.join("tool")).unwrap();
        fs::write(dir.join("tool").join("tool.sh"), "#!/bin/sh\n").unwrap();
        let resolved = resolve_tool_path(&dir, "tool.sh").unwrap();
        assert_eq!(dir.join("tool").join("tool.sh"), resolved);
    }

    #[test]
    fn test_resolve_tool_path_not_found_lists_both_paths() {
        let dir = tmp_dir("missing");
        let err = resolve_tool_path(&dir, "does-not-exist").unwrap_err();
        let message = error_strings(&err).join(" ");
        assert!(message.contains("does-not-exist"));
    }

    #[test]
    fn test_resolve_tool_path_prefers_flat_over_nested() {
        let dir = tmp_dir("both");
        fs::write(dir.join("tool.sh"), "flat").unwrap();
        fs::create_dir_all(dir.join("tool")).unwrap();
        fs::write(dir.join("tool").join("tool.sh"), "nested").unwrap();
        let resolved = resolve_tool_path(&dir, "tool.sh").unwrap();
        assert_eq!(dir.join("tool.sh"), resolved);
    }

    #[test]
    fn test_run_attempt_succeeds_on_zero_exit() {
        let dir = tmp_dir("run-success");
        write_script(&dir, "succeed.sh", "#!/bin/sh\nexit 0\n");

        let job = command_line_job(Some(5), "succeed.sh");
        let result = run_attempt(&test_log(), &job, "", &dir, 0);

        assert!(!result.is_err());
    }

    #[test]
    fn test_run_attempt_reports_nonzero_exit_as_error() {
        let dir = tmp_dir("run-failure");
        write_script(&dir, "fail.sh", "#!/bin/sh\necho boom 1>&2\nexit 7\n");

        let job = command_line_job(Some(5), "fail.sh");
        let result = run_attempt(&test_log(), &job, "", &dir, 0);

        match result {
            JobResult::Error { return_code, error_message, .. } => {
                assert_eq!(7, return_code);
                assert!(error_message.contains("boom"));
            }
            JobResult::Success { .. } => panic!("expected an error result"),
        }
    }

    #[test]
    fn test_run_attempt_kills_and_times_out_a_slow_child() {
        let dir = tmp_dir("run-timeout");
        write_script(&dir, "slow.sh", "#!/bin/sh\nsleep 5\nexit 0\n");

        let job = command_line_job(Some(1), "slow.sh");

        let start = Instant::now();
        let result = run_attempt(&test_log(), &job, "", &dir, 0);
        let elapsed = start.elapsed();

        assert!(result.is_err());
        assert!(
            elapsed < ::std::time::Duration::from_secs(3),
            "expected the timed-out child to be killed well before its 5s sleep elapsed, took {:?}",
            elapsed
        );
    }
}

//! The transactional boundary between the core and the `ppe` schema's stored
//! procedures. `Db` never issues anything but a procedure call; it owns no
//! table of its own.

use errors::*;
use model::{Job, JobResult, Task};
use schema::{BatchIdRow, JobIdRow, ReadyTaskRow};
use time_helpers;

use diesel;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};
use r2d2::Pool;
use r2d2_diesel::ConnectionManager;
use slog::Logger;
use std::sync::Mutex;

type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Opens a fresh batch and returns its id. A free function because it runs
/// before a `Db` exists to be a method on.
pub fn create_batch(pool: &PgPool) -> Result<i64> {
    let conn = pool.get()?;
    let rows: Vec<BatchIdRow> = diesel::sql_query("SELECT * FROM ppe.create_batch()").load(&*conn)?;
    rows.into_iter()
        .next()
        .map(|r| r.batch_id)
        .ok_or_else(|| ErrorKind::MissingRow("ppe.create_batch".into()).into())
}

/// Bound to one batch for the lifetime of a supervisor run. Calls that must
/// never share a transaction scope across runner threads
/// (`get_ready_job`, `update_queue`, `update_task_issues`, `delete_old_logs`,
/// `cancel_running_jobs`) go through `self.lock`; log-only calls need no
/// serialization beyond the pool's own.
pub struct Db {
    pool:              PgPool,
    batch_id:          i64,
    days_logs_to_keep: i32,
    lock:              Mutex<()>,
}

impl Db {
    pub fn new(pool: PgPool, batch_id: i64, days_logs_to_keep: i32) -> Db {
        Db {
            pool,
            batch_id,
            days_logs_to_keep,
            lock: Mutex::new(()),
        }
    }

    pub fn batch_id(&self) -> i64 {
        self.batch_id
    }

    pub fn cancel_running_jobs(&self, reason: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let conn = self.pool.get()?;
        diesel::sql_query("CALL ppe.cancel_running_jobs(p_reason := $1)")
            .bind::<Text, _>(reason)
            .execute(&*conn)?;
        Ok(())
    }

    pub fn get_ready_job(&self, log: &Logger) -> Result<Option<Job>> {
        let _guard = self.lock.lock().unwrap();
        let conn = self.pool.get()?;

        conn.transaction::<_, Error, _>(|| {
            let rows: Vec<ReadyTaskRow> =
                diesel::sql_query("SELECT task_id, task_name, tool, tool_args, task_sql, retries, timeout_seconds FROM ppe.get_ready_task() AS t")
                    .load(&*conn)?;

            let row = match rows.into_iter().next() {
                Some(row) => row,
                None => return Ok(None),
            };

            let task = task_from_row(row)?;

            let job_rows: Vec<JobIdRow> = diesel::sql_query(
                "SELECT * FROM ppe.create_job(p_batch_id := $1, p_task_id := $2)",
            ).bind::<BigInt, _>(self.batch_id)
                .bind::<BigInt, _>(task.task_id)
                .load(&*conn)?;

            let job_id = job_rows
                .into_iter()
                .next()
                .map(|r| r.job_id)
                .ok_or_else(|| Error::from(ErrorKind::MissingRow("ppe.create_job".into())))?;

            debug!(log, "Claimed ready job"; "job_id" => job_id, "task_id" => task.task_id);

            Ok(Some(Job {
                job_id,
                batch_id: self.batch_id,
                task,
            }))
        })
    }

    pub fn log_job_success(&self, job_id: i64, execution_millis: i64) -> Result<()> {
        let conn = self.pool.get()?;
        diesel::sql_query("CALL ppe.job_completed_successfully(p_job_id := $1, p_execution_millis := $2)")
            .bind::<BigInt, _>(job_id)
            .bind::<BigInt, _>(execution_millis)
            .execute(&*conn)?;
        Ok(())
    }

    pub fn log_job_error(&self, job_id: i64, _return_code: i32, error_message: &str) -> Result<()> {
        let conn = self.pool.get()?;
        diesel::sql_query("CALL ppe.job_failed(p_job_id := $1, p_message := $2)")
            .bind::<BigInt, _>(job_id)
            .bind::<Text, _>(error_message)
            .execute(&*conn)?;
        Ok(())
    }

    pub fn log_job_result(&self, job: &Job, result: &JobResult) -> Result<()> {
        match *result {
            JobResult::Success { execution_millis, .. } => self.log_job_success(job.job_id, execution_millis),
            JobResult::Error { return_code, ref error_message, .. } => {
                self.log_job_error(job.job_id, return_code, error_message)
            }
        }
    }

    pub fn log_batch_info(&self, message: &str) -> Result<()> {
        let conn = self.pool.get()?;
        diesel::sql_query("CALL ppe.log_batch_info(p_batch_id := $1, p_message := $2)")
            .bind::<BigInt, _>(self.batch_id)
            .bind::<Text, _>(message)
            .execute(&*conn)?;
        Ok(())
    }

    pub fn log_batch_error(&self, error_message: &str) -> Result<()> {
        let conn = self.pool.get()?;
        diesel::sql_query("CALL ppe.log_batch_error(p_batch_id := $1, p_message := $2)")
            .bind::<BigInt, _>(self.batch_id)
            .bind::<Text, _>(error_message)
            .execute(&*conn)?;
        Ok(())
    }

    pub fn update_queue(&self, log: &Logger) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        time_helpers::log_timed(&log.new(o!("step" => "update_queue")), |_log| {
            let conn = self.pool.get()?;
            diesel::sql_query("CALL ppe.update_queue()").execute(&*conn)?;
            Ok(())
        })
    }

    pub fn update_task_issues(&self, log: &Logger) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        time_helpers::log_timed(&log.new(o!("step" => "update_task_issues")), |_log| {
            let conn = self.pool.get()?;
            diesel::sql_query("CALL ppe.update_task_issues()").execute(&*conn)?;
            Ok(())
        })
    }

    pub fn delete_old_logs(&self, log: &Logger) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        time_helpers::log_timed(&log.new(o!("step" => "delete_old_logs")), |_log| {
            let conn = self.pool.get()?;
            diesel::sql_query("CALL ppe.delete_old_log_entries(p_current_batch_id := $1, p_days_to_keep := $2)")
                .bind::<BigInt, _>(self.batch_id)
                .bind::<Integer, _>(self.days_logs_to_keep)
                .execute(&*conn)?;
            Ok(())
        })
    }
}

fn task_from_row(row: ReadyTaskRow) -> Result<Task> {
    if let Some(sql) = row.task_sql {
        return Task::sql(row.task_id, &row.task_name, row.timeout_seconds, row.retries, &sql);
    }
    if let Some(tool) = row.tool {
        return Task::command_line(
            row.task_id,
            &row.task_name,
            row.timeout_seconds,
            row.retries,
            &tool,
            row.tool_args,
        );
    }
    Err(ErrorKind::InvalidTask(format!(
        "ready task {} has neither task_sql nor tool set",
        row.task_id
    )).into())
}

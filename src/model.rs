//! Value types exchanged between the database adapter, the executor, and the
//! runner: `Task` (and its three variants), `Job`, and `JobResult`.
//!
//! These are plain, immutable data. All construction goes through validating
//! constructors that reject inputs violating the invariants below with
//! `ErrorKind::InvalidTask`; there are no mutation operations once built.

use errors::*;

use std::collections::BTreeMap;

/// The variant-specific payload of a `Task`. Tagged so that dispatch in
/// `executor::run_attempt` can be an exhaustive `match` rather than a
/// duck-typed lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskVariant {
    Sql { sql: String },
    CommandLine {
        tool:      String,
        tool_args: Option<Vec<String>>,
    },
    CondaProject {
        env:          String,
        project_name: String,
        func:         String,
        func_args:    BTreeMap<String, String>,
    },
}

/// An immutable work definition. `task_id` is assigned and owned by the
/// database; the core never mints one.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub task_id:         i64,
    pub name:            String,
    pub timeout_seconds: Option<i64>,
    pub retries:         i32,
    pub variant:         TaskVariant,
}

impl Task {
    fn check_common(task_id: i64, name: &str, timeout_seconds: Option<i64>, retries: i32) -> Result<()> {
        if task_id <= 0 {
            return Err(ErrorKind::InvalidTask("task_id must be > 0".into()).into());
        }
        if name.is_empty() {
            return Err(ErrorKind::InvalidTask("name cannot be blank".into()).into());
        }
        if let Some(t) = timeout_seconds {
            if t < 0 {
                return Err(ErrorKind::InvalidTask("timeout_seconds must be >= 0".into()).into());
            }
        }
        if retries < 0 {
            return Err(ErrorKind::InvalidTask("retries must be >= 0".into()).into());
        }
        Ok(())
    }

    pub fn sql(
        task_id: i64,
        name: &str,
        timeout_seconds: Option<i64>,
        retries: i32,
        sql: &str,
    ) -> Result<Task> {
        Self::check_common(task_id, name, timeout_seconds, retries)?;
        if sql.is_empty() {
            return Err(ErrorKind::InvalidTask("sql cannot be blank".into()).into());
        }
        Ok(Task {
            task_id,
            name: name.to_owned(),
            timeout_seconds,
            retries,
            variant: TaskVariant::Sql { sql: sql.to_owned() },
        })
    }

    pub fn command_line(
        task_id: i64,
        name: &str,
        timeout_seconds: Option<i64>,
        retries: i32,
        tool: &str,
        tool_args: Option<Vec<String>>,
    ) -> Result<Task> {
        Self::check_common(task_id, name, timeout_seconds, retries)?;
        if tool.is_empty() {
            return Err(ErrorKind::InvalidTask("tool cannot be blank".into()).into());
        }
        if let Some(ref args) = tool_args {
            if args.is_empty() {
                return Err(ErrorKind::InvalidTask(
                    "if tool_args is provided, it must have at least 1 item".into(),
                ).into());
            }
        }
        Ok(Task {
            task_id,
            name: name.to_owned(),
            timeout_seconds,
            retries,
            variant: TaskVariant::CommandLine {
                tool: tool.to_owned(),
                tool_args,
            },
        })
    }

    pub fn conda_project(
        task_id: i64,
        name: &str,
        timeout_seconds: Option<i64>,
        retries: i32,
        env: &str,
        project_name: &str,
        func: &str,
        func_args: BTreeMap<String, String>,
    ) -> Result<Task> {
        Self::check_common(task_id, name, timeout_seconds, retries)?;
        if env.is_empty() {
            return Err(ErrorKind::InvalidTask("env cannot be blank".into()).into());
        }
        if project_name.is_empty() {
            return Err(ErrorKind::InvalidTask("project_name cannot be blank".into()).into());
        }
        if func.is_empty() {
            return Err(ErrorKind::InvalidTask("func cannot be blank".into()).into());
        }
        Ok(Task {
            task_id,
            name: name.to_owned(),
            timeout_seconds,
            retries,
            variant: TaskVariant::CondaProject {
                env: env.to_owned(),
                project_name: project_name.to_owned(),
                func: func.to_owned(),
                func_args,
            },
        })
    }

    pub fn variant_name(&self) -> &'static str {
        match self.variant {
            TaskVariant::Sql { .. } => "sql",
            TaskVariant::CommandLine { .. } => "command_line",
            TaskVariant::CondaProject { .. } => "conda_project",
        }
    }
}

/// One attempt descriptor. `job_id` is assigned by the database side effect
/// of claiming a task; the core does not mint it either.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub job_id:   i64,
    pub batch_id: i64,
    pub task:     Task,
}

/// The outcome of one job attempt, including however many retries it took to
/// get there.
#[derive(Clone, Debug, PartialEq)]
pub enum JobResult {
    Success {
        execution_millis: i64,
        retries:          i32,
    },
    Error {
        return_code:   i32,
        error_message: String,
        retries:       i32,
    },
}

impl JobResult {
    pub fn success(execution_millis: i64, retries: i32) -> JobResult {
        JobResult::Success { execution_millis, retries }
    }

    pub fn error(return_code: i32, error_message: String, retries: i32) -> JobResult {
        JobResult::Error { return_code, error_message, retries }
    }

    pub fn timeout(task_name: &str, timeout_seconds: i64, retries: i32) -> JobResult {
        JobResult::Error {
            return_code: -1,
            error_message: format!("[{}] timed out after {} seconds", task_name, timeout_seconds),
            retries,
        }
    }

    pub fn is_err(&self) -> bool {
        match *self {
            JobResult::Error { .. } => true,
            JobResult::Success { .. } => false,
        }
    }

    pub fn retries(&self) -> i32 {
        match *self {
            JobResult::Success { retries, .. } | JobResult::Error { retries, .. } => retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use model::*;

    #[test]
    fn test_sql_task_rejects_blank_sql() {
        let res = Task::sql(1, "t1", Some(60), 0, "");
        assert!(res.is_err());
    }

    #[test]
    fn test_sql_task_rejects_nonpositive_id() {
        let res = Task::sql(0, "t1", Some(60), 0, "select 1");
        assert!(res.is_err());
    }

    #[test]
    fn test_sql_task_rejects_blank_name() {
        let res = Task::sql(1, "", Some(60), 0, "select 1");
        assert!(res.is_err());
    }

    #[test]
    fn test_sql_task_rejects_negative_retries() {
        let res = Task::sql(1, "t1", Some(60), -1, "select 1");
        assert!(res.is_err());
    }

    #[test]
    fn test_sql_task_rejects_negative_timeout() {
        let res = Task::sql(1, "t1", Some(-1), 0, "select 1");
        assert!(res.is_err());
    }

    #[test]
    fn test_sql_task_allows_absent_timeout() {
        let res = Task::sql(1, "t1", None, 0, "select 1");
        assert!(res.is_ok());
    }

    #[test]
    fn test_command_line_task_rejects_blank_tool() {
        let res = Task::command_line(1, "t1", Some(60), 0, "", None);
        assert!(res.is_err());
    }

    #[test]
    fn test_command_line_task_rejects_empty_tool_args() {
        let res = Task::command_line(1, "t1", Some(60), 0, "tool.sh", Some(vec![]));
        assert!(res.is_err());
    }

    #[test]
    fn test_command_line_task_accepts_absent_tool_args() {
        let res = Task::command_line(1, "t1", Some(60), 0, "tool.sh", None);
        assert!(res.is_ok());
    }

    #[test]
    fn test_conda_project_task_rejects_blank_env() {
        let res = Task::conda_project(1, "t1", None, 0, "", "proj", "src.main", Default::default());
        assert!(res.is_err());
    }

    #[test]
    fn test_task_is_structurally_equal() {
        let a = Task::sql(1, "t1", Some(60), 0, "select 1").unwrap();
        let b = Task::sql(1, "t1", Some(60), 0, "select 1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_job_result_success_is_not_err() {
        let r = JobResult::success(120, 0);
        assert!(!r.is_err());
        assert_eq!(0, r.retries());
    }

    #[test]
    fn test_job_result_timeout_message() {
        let r = JobResult::timeout("t1", 30, 2);
        match r {
            JobResult::Error { return_code, error_message, retries } => {
                assert_eq!(-1, return_code);
                assert_eq!(2, retries);
                assert!(error_message.contains("t1"));
                assert!(error_message.contains("30 seconds"));
            }
            JobResult::Success { .. } => panic!("expected error variant"),
        }
    }
}

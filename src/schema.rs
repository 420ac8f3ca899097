//! Raw-SQL row shapes returned by the `ppe` stored procedures.
//!
//! The core never owns a table of its own -- every mutating or selecting
//! operation goes through a procedure call in `db.rs` -- so there is no
//! generated schema here, just the handful of `table!` declarations needed to
//! give `#[derive(QueryableByName)]` a column-type vocabulary to resolve
//! against, the same trick `sql_query` callers use elsewhere for query
//! results that don't map onto a real table.

table! {
    ppe_ready_task (task_id) {
        task_id -> BigInt,
        task_name -> Text,
        tool -> Nullable<Text>,
        tool_args -> Nullable<Array<Text>>,
        task_sql -> Nullable<Text>,
        retries -> Integer,
        timeout_seconds -> Nullable<BigInt>,
    }
}

table! {
    ppe_batch (batch_id) {
        batch_id -> BigInt,
    }
}

table! {
    ppe_job (job_id) {
        job_id -> BigInt,
    }
}

/// One row from `ppe.get_ready_task()`. `tool`/`tool_args` are populated for
/// command-line tasks, `task_sql` for SQL tasks; neither the database nor this
/// struct enforces which combination is present -- `model::Task::*` does that
/// at construction time in `db.rs`.
#[derive(Clone, Debug, QueryableByName)]
#[table_name = "ppe_ready_task"]
pub struct ReadyTaskRow {
    #[sql_type = "::diesel::sql_types::BigInt"]
    pub task_id: i64,

    #[sql_type = "::diesel::sql_types::Text"]
    pub task_name: String,

    #[sql_type = "::diesel::sql_types::Nullable<::diesel::sql_types::Text>"]
    pub tool: Option<String>,

    #[sql_type = "::diesel::sql_types::Nullable<::diesel::sql_types::Array<::diesel::sql_types::Text>>"]
    pub tool_args: Option<Vec<String>>,

    #[sql_type = "::diesel::sql_types::Nullable<::diesel::sql_types::Text>"]
    pub task_sql: Option<String>,

    #[sql_type = "::diesel::sql_types::Integer"]
    pub retries: i32,

    #[sql_type = "::diesel::sql_types::Nullable<::diesel::sql_types::BigInt>"]
    pub timeout_seconds: Option<i64>,
}

/// Return row of `ppe.create_batch()`.
#[derive(Clone, Debug, QueryableByName)]
#[table_name = "ppe_batch"]
pub struct BatchIdRow {
    #[sql_type = "::diesel::sql_types::BigInt"]
    pub batch_id: i64,
}

/// Return row of `ppe.create_job(batch_id, task_id)`.
#[derive(Clone, Debug, QueryableByName)]
#[table_name = "ppe_job"]
pub struct JobIdRow {
    #[sql_type = "::diesel::sql_types::BigInt"]
    pub job_id: i64,
}

//! Shared scaffolding for the ignored, database-backed integration tests,
//! following the shape of the teacher's `test_helpers.rs`: a connection pool
//! built from `TEST_DATABASE_URL` and a synchronous logger, here extended
//! with a batch-scoped `Db` since `ppe`'s tests operate on whole batches
//! rather than individual table rows.

// `extern crate` declarations live in each test binary's root (the file that
// does `mod support;`) rather than here, since `#[macro_use]` only reaches
// submodules when it's applied at the crate root.

use diesel::pg::PgConnection;
use r2d2::Pool;
use r2d2_diesel::ConnectionManager;
use slog::{Drain, Logger};

use std::env;
use std::sync::Arc;

use ppe::db::{self, Db};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Builds a tiny pool against `TEST_DATABASE_URL`. Panics with a clear
/// message if the variable isn't set, exactly like the teacher's
/// `test_helpers::connection`.
pub fn pool() -> PgPool {
    let database_url = env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set in order to run tests");
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(4)
        .build(manager)
        .expect("error building test pool")
}

pub fn log() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(::std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = ::std::sync::Mutex::new(drain).fuse();
    Logger::root(drain.fuse(), o!("env" => "test"))
}

/// Opens a fresh batch against the test database and wraps it in a `Db`,
/// mirroring what `supervisor::run_batch` does at the start of a real run.
pub fn bootstrap_db() -> Arc<Db> {
    let pool = pool();
    let batch_id = db::create_batch(&pool).expect("error creating test batch");
    Arc::new(Db::new(pool, batch_id, 30))
}

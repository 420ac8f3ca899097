#![recursion_limit = "128"]

extern crate ctrlc;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
extern crate isatty;
extern crate r2d2;
extern crate r2d2_diesel;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;
extern crate time;
extern crate wait_timeout;

pub mod config;
pub mod db;
pub mod error_helpers;
pub mod errors;
pub mod executor;
pub mod fs;
pub mod logging;
pub mod model;
pub mod retry;
pub mod runner;
pub mod scheduler;

// Hand-written rather than generated: the core only calls stored procedures,
// it never owns a table.
mod schema;

pub mod supervisor;
pub mod time_helpers;

extern crate clap;
extern crate ppe;
#[macro_use]
extern crate slog;

use ppe::config::Config;
use ppe::error_helpers;
use ppe::errors::*;
use ppe::executor;
use ppe::fs;
use ppe::logging;
use ppe::supervisor;

use clap::{App, Arg, ArgMatches, SubCommand};
use std::io::Read;
use std::path::PathBuf;

fn main() {
    let app = App::new("ppe")
        .version("0.1")
        .about("Persistent job executor")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .help("Path to config.json (defaults to <exe-dir>/assets/config.json)"),
        )
        .arg(
            Arg::with_name("log-async")
                .long("log-async")
                .help("Log asynchronously regardless of whether stdout is a terminal"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Runs the executor, restarting on fatal errors until shut down")
                .arg(
                    Arg::with_name("once")
                        .long("once")
                        .help("Run a single bounded supervisor attempt instead of looping forever"),
                ),
        )
        .subcommand(SubCommand::with_name(executor::INTERNAL_RUN_SQL_ARG).about(
            "internal: runs a SQL statement read from stdin (first line: connection string, \
             remainder: the statement) against that connection",
        ));

    let matches = app.clone().get_matches();

    let res = match matches.subcommand_name() {
        Some("run") => subcommand_run(&matches),
        Some(name) if name == executor::INTERNAL_RUN_SQL_ARG => subcommand_internal_run_sql(&matches),
        _ => {
            let mut app = app;
            app.print_help().unwrap();
            println!();
            Ok(())
        }
    };

    if let Err(ref e) = res {
        let log = slog::Logger::root(slog::Discard, o!());
        error_helpers::print_error(&log, e);
        ::std::process::exit(1);
    }
}

fn subcommand_run(matches: &ArgMatches) -> Result<()> {
    let run_matches = matches.subcommand_matches("run").unwrap();
    let once = run_matches.is_present("once");
    let log_async = matches.is_present("log-async");

    let root = fs::root_dir()?;
    let config_path = matches
        .value_of("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| fs::config_path(&root));
    let config = Config::load(&config_path)?;

    let log_dir = fs::log_dir(&root)?;
    let tool_dir = fs::tool_dir(&root)?;
    let log = logging::build(&log_dir, log_async);

    info!(log, "Starting ppe");

    let exit_code = if once {
        supervisor::run_once(&log, &config, &tool_dir)
    } else {
        supervisor::run_forever(&log, &config, &tool_dir)
    };

    ::std::process::exit(exit_code);
}

/// Hidden subcommand used by `executor::run_attempt` to re-exec this binary
/// so that a `SqlTask`'s statement runs inside a genuine child process, the
/// same as a `CommandLineTask`'s tool. The connection string is never passed
/// as an argument -- argv is visible to any local user via `ps` -- so it
/// travels on stdin instead, as the first line, with the SQL statement
/// making up the rest of the stream.
fn subcommand_internal_run_sql(_matches: &ArgMatches) -> Result<()> {
    let mut payload = String::new();
    ::std::io::stdin().read_to_string(&mut payload)?;

    let mut parts = payload.splitn(2, '\n');
    let connection_str = parts.next().unwrap_or("");
    let sql = parts.next().unwrap_or("");

    executor::run_internal_sql(connection_str, sql)
}

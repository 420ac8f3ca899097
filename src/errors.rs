// Define an errors module and use a glob import as recommended by:
//
//     http://brson.github.io/2016/11/30/starting-with-error-chain
//

// Create the Error, ErrorKind, ResultExt, and Result types
error_chain!{
    // Automatic conversions between this error chain and other error types not defined by the
    // `error_chain!`. The description and cause will forward to the description and cause of the
    // original error.
    foreign_links {
        Database(::diesel::result::Error);
        DatabaseConnection(::diesel::ConnectionError);
        DatabaseConnectionPool(::r2d2::Error);
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        InvalidTask(message: String) {
            description("invalid task")
            display("invalid task: {}", message)
        }

        ToolNotFound(tool: String, tried: Vec<String>) {
            description("tool not found")
            display("tool '{}' not found; tried: {}", tool, tried.join(", "))
        }

        UnsupportedTaskVariant(name: String) {
            description("unsupported task variant")
            display("task variant is not supported by this build: {}", name)
        }

        JobTimedOut(task_name: String, timeout_seconds: i64) {
            description("job timed out")
            display("[{}] timed out after {} seconds", task_name, timeout_seconds)
        }

        MissingRow(procedure: String) {
            description("stored procedure returned no row")
            display("{} should have returned a row, but returned none", procedure)
        }
    }
}

// Collect error strings together so that we can build a good error message to
// send up. It's worth noting that the original error is actually at the end of
// the iterator, but since it's the most relevant, we reverse the list.
//
// The chain isn't a double-ended iterator (meaning we can't use `rev`), so we
// have to collect it to a Vec first before reversing it.
pub fn error_strings(error: &Error) -> Vec<String> {
    error
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .iter()
        .cloned()
        .rev()
        .collect()
}

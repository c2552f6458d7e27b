//! Logging setup
//!
//! Every line carries the source location of the call site so a log can be
//! followed straight back into the code.
//!
//! Format: <timestamp> <LEVEL> [file:line] message
//!
//! Example:
//! ```text
//! 2024-06-01T10:12:03Z INFO  [src/link/mod.rs:141] link: connected to "home", ip 10.0.0.7, rssi -52
//! ```

use std::io::Write;

use env_logger::{Builder, Env};
use log::Record;

/// Install the global logger. `RUST_LOG` wins over `default_level`.
/// Calling this twice is harmless.
pub fn init(default_level: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {} {}",
                buf.timestamp(),
                record.level(),
                location(record),
                record.args()
            )
        })
        .try_init();
}

fn location(record: &Record) -> String {
    match (record.file(), record.line()) {
        (Some(file), Some(line)) => format!("[{}:{}]", file, line),
        (Some(file), None) => format!("[{}]", file),
        _ => format!("[{}]", record.target()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_prefers_file_and_line() {
        let record = Record::builder()
            .file(Some("src/timer.rs"))
            .line(Some(42))
            .target("pool_controller::timer")
            .build();
        assert_eq!(location(&record), "[src/timer.rs:42]");
    }

    #[test]
    fn location_falls_back_to_target() {
        let record = Record::builder().target("pool_controller").build();
        assert_eq!(location(&record), "[pool_controller]");
    }
}

//! Logging configuration for the collector node.

use chrono::{DateTime, Utc};
use env_logger::{Builder, Env, Target};
use log::{info, Record};
#[cfg(test)]
use log::LevelFilter;
use std::io::{self, Write};

/// Initialize the logging system. `COLLECTOR_LOG` overrides `level`.
/// Later calls are no-ops.
pub fn init_logging(level: &str) {
    let env = Env::default()
        .filter_or("COLLECTOR_LOG", level)
        .write_style_or("COLLECTOR_LOG_STYLE", "auto");

    Builder::from_env(env)
        .format(|buf, record| write_line(buf, Utc::now(), record))
        .target(Target::Stderr)
        .try_init()
        .ok();

    info!("Logging initialized at level: {}", level);
}

/// One log line. Timestamps are always UTC so logs from many nodes line up.
fn write_line<W: Write>(out: &mut W, now: DateTime<Utc>, record: &Record) -> io::Result<()> {
    writeln!(
        out,
        "{} {:5} :: {}:{} :: {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.target(),
        record.line().unwrap_or(0),
        record.args()
    )
}

/// Initialize test logging (for use in tests)
#[cfg(test)]
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(LevelFilter::Debug)
        .try_init();
}

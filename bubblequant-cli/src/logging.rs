use std::thread;

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

use crate::PROGRESS_BAR;

const OWN_TARGET_PREFIX: &str = "bubblequant";

/// Logger printing through the progress bar.
///
/// Records from other crates are only shown from `info` up. Records emitted
/// on named threads (e.g. bootstrap workers) carry the thread name.
struct Logger;

impl Logger {
    fn format_record(record: &Record) -> String {
        let target = record
            .target()
            .strip_prefix("bubblequant::")
            .unwrap_or_else(|| record.target());
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        match thread::current().name() {
            Some(name) if name != "main" => format!(
                "{} [{}] [{}@{}] {}",
                timestamp,
                record.level(),
                target,
                name,
                record.args()
            ),
            _ => format!(
                "{} [{}] [{}] {}",
                timestamp,
                record.level(),
                target,
                record.args()
            ),
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(OWN_TARGET_PREFIX) || metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let msg = Self::format_record(record);
        if PROGRESS_BAR.is_hidden() {
            eprintln!("{}", msg);
        } else {
            PROGRESS_BAR.println(msg);
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

pub fn init_logging(filter: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(filter);

    Ok(())
}

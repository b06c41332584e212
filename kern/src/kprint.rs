//! Kernel console logging.
//!
//! Kern logs through the [`log`] facade. [`init`] installs the console logger
//! that prints each record as a single `[LEVEL] message` line on standard
//! error. Records below `info` also carry their source location.

use log::{LevelFilter, Log, Metadata, Record};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// Silences the console when set.
pub static QUITE: AtomicBool = AtomicBool::new(false);

/// Environment variable that selects the console log level.
pub const LOG_LEVEL_ENV: &str = "KERN_LOG";

/// Install the console logger.
///
/// The level comes from `KERN_LOG` and defaults to `info`. Calling this more
/// than once is harmless; only the first call installs the logger.
pub fn init() {
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|v| parse_level(&v))
        .unwrap_or(LevelFilter::Info);
    if log::set_logger(&CONSOLE_LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Silence or unsilence the console logger.
pub fn set_quiet(quiet: bool) {
    QUITE.store(quiet, Ordering::SeqCst);
}

fn parse_level(v: &str) -> Option<LevelFilter> {
    match v.trim().to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !QUITE.load(Ordering::SeqCst) && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut console = std::io::stderr().lock();
        // A closed console is not worth crashing the kernel over.
        let _ = if record.level() > log::Level::Info {
            writeln!(
                console,
                "[{}][{}:{}] {}",
                record.level(),
                record.file().unwrap_or("<NONE>"),
                record.line().unwrap_or_default(),
                record.args()
            )
        } else {
            writeln!(console, "[{}] {}", record.level(), record.args())
        };
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static CONSOLE_LOGGER: ConsoleLogger = ConsoleLogger;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::Debug));
        assert_eq!(parse_level(" warn "), Some(LevelFilter::Warn));
        assert_eq!(parse_level("loud"), None);
    }
}

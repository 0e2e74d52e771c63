//! Process-wide fan-out logger.
//!
//! Three independent sinks — syslog, stderr, and a size-capped rotating
//! file (5 MiB x 2 backups) — each optional. A sink that fails to
//! initialize (no local syslog socket, unwritable log directory) is
//! skipped; the remaining sinks still receive messages. The public surface
//! is two plain functions, [`log`] and [`errormsg`], used throughout the
//! crate wherever a step needs to report progress or a failure.

use std::sync::{Mutex, Once};

use chrono::Utc;
use flexi_logger::writers::{FileLogWriter, LogWriter};
use flexi_logger::{Cleanup, Criterion, DeferredNow, FileSpec, Naming};
use log::{Level, Log, Metadata, Record};

use crate::utils::paths::LOG_FILE_PATH;

struct FanoutLogger {
    syslog: Option<Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>>,
    file: Option<FileLogWriter>,
}

impl FanoutLogger {
    fn new() -> Self {
        let syslog = syslog::unix(syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: "updaTA".into(),
            pid: std::process::id(),
        })
        .map_err(|e| eprintln!("updata: syslog sink unavailable: {e}"))
        .ok()
        .map(Mutex::new);

        let file = FileSpec::try_from(LOG_FILE_PATH)
            .and_then(|spec| {
                FileLogWriter::builder(spec)
                    .rotate(
                        Criterion::Size(5 * 1024 * 1024),
                        Naming::Numbers,
                        Cleanup::KeepLogFiles(2),
                    )
                    .append()
                    .try_build()
            })
            .map_err(|e| eprintln!("updata: rotating log file unavailable: {e}"))
            .ok();

        FanoutLogger { syslog, file }
    }
}

impl Log for FanoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        eprintln!("{}: {}", record.level(), record.args());

        if let Some(syslog) = &self.syslog {
            if let Ok(mut sender) = syslog.lock() {
                let outcome = match record.level() {
                    Level::Error => sender.err(record.args().to_string()),
                    _ => sender.info(record.args().to_string()),
                };
                let _ = outcome;
            }
        }

        if let Some(file) = &self.file {
            let _ = file.write(&mut DeferredNow::new(), record);
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.flush();
        }
    }
}

static INIT: Once = Once::new();

/// Installs the fan-out logger as the process-wide `log` backend. Safe to
/// call more than once; only the first call takes effect. Both binaries
/// call this at the top of `main`, before anything else logs.
pub fn init() {
    INIT.call_once(|| {
        let logger = FanoutLogger::new();
        if log::set_boxed_logger(Box::new(logger)).is_ok() {
            log::set_max_level(log::LevelFilter::Info);
        }
    });
}

/// Logs an informational message, timestamped in UTC ISO 8601.
pub fn log(msg: &str) {
    log::info!("{} {}", Utc::now().to_rfc3339(), msg);
}

/// Logs an error message, timestamped in UTC ISO 8601.
pub fn errormsg(msg: &str) {
    log::error!("{} {}", Utc::now().to_rfc3339(), msg);
}

//
// meli - managesieve
//
// Copyright 2019 Manos Pitsidianakis
//
// This file is part of meli.
//
// meli is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// meli is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with meli. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

use std::{
    io::Write,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::DateTime;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::{Error, ErrorKind, Result};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, PartialOrd, Serialize)]
#[repr(u8)]
pub enum LogLevel {
    OFF = 0,
    ERROR,
    WARN,
    #[default]
    INFO,
    DEBUG,
    TRACE,
}

impl From<u8> for LogLevel {
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => Self::OFF,
            1 => Self::ERROR,
            2 => Self::WARN,
            3 => Self::INFO,
            4 => Self::DEBUG,
            _ => Self::TRACE,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(l: Level) -> Self {
        match l {
            Level::Error => Self::ERROR,
            Level::Warn => Self::WARN,
            Level::Info => Self::INFO,
            Level::Debug => Self::DEBUG,
            Level::Trace => Self::TRACE,
        }
    }
}

impl From<LogLevel> for Level {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::ERROR => Self::Error,
            LogLevel::WARN => Self::Warn,
            LogLevel::OFF | LogLevel::INFO => Self::Info,
            LogLevel::DEBUG => Self::Debug,
            LogLevel::TRACE => Self::Trace,
        }
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(l: LevelFilter) -> Self {
        match l {
            LevelFilter::Off => Self::OFF,
            LevelFilter::Error => Self::ERROR,
            LevelFilter::Warn => Self::WARN,
            LevelFilter::Info => Self::INFO,
            LevelFilter::Debug => Self::DEBUG,
            LevelFilter::Trace => Self::TRACE,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::OFF => Self::Off,
            LogLevel::ERROR => Self::Error,
            LogLevel::WARN => Self::Warn,
            LogLevel::INFO => Self::Info,
            LogLevel::DEBUG => Self::Debug,
            LogLevel::TRACE => Self::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                OFF => "OFF",
                ERROR => "ERROR",
                WARN => "WARN",
                INFO => "INFO",
                DEBUG => "DEBUG",
                TRACE => "TRACE",
            }
        )
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            l if l.eq_ignore_ascii_case("off") => OFF,
            l if l.eq_ignore_ascii_case("error") => ERROR,
            l if l.eq_ignore_ascii_case("warn") => WARN,
            l if l.eq_ignore_ascii_case("info") => INFO,
            l if l.eq_ignore_ascii_case("debug") => DEBUG,
            l if l.eq_ignore_ascii_case("trace") => TRACE,
            other => {
                return Err(Error::new(format!("Invalid log level `{}`.", other))
                    .set_kind(ErrorKind::Configuration))
            }
        })
    }
}

use LogLevel::*;

/// `strftime(3)` format of the timestamp that starts every log line.
pub const TIMESTAMP_FMT: &str = "%a, %d %b %Y %R";

/// Format a UNIX epoch timestamp in UTC with [`TIMESTAMP_FMT`].
pub fn timestamp_to_string(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(TIMESTAMP_FMT).to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Logger that writes every record to standard error.
#[derive(Clone)]
pub struct StderrLogger {
    level: Arc<AtomicU8>,
    print_level: bool,
    print_module_names: bool,
}

impl std::fmt::Debug for StderrLogger {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(StderrLogger))
            .field("level", &self.log_level())
            .field("print_level", &self.print_level)
            .field("print_module_names", &self.print_module_names)
            .finish()
    }
}

impl Default for StderrLogger {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl StderrLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(level as u8)),
            print_level: true,
            print_module_names: true,
        }
    }

    /// Install a logger as the global `log` logger. Can only succeed once per
    /// process.
    pub fn init(level: LogLevel) -> Result<Self> {
        let logger = Self::new(level);
        log::set_boxed_logger(Box::new(logger.clone())).map_err(|err| {
            Error::new("Could not install logger.")
                .set_details(err.to_string())
                .set_kind(ErrorKind::Bug)
        })?;
        logger.apply_max_level();
        Ok(logger)
    }

    fn apply_max_level(&self) {
        #[cfg(feature = "debug-tracing")]
        log::set_max_level(
            if matches!(LevelFilter::from(self.log_level()), LevelFilter::Off) {
                LevelFilter::Off
            } else {
                LevelFilter::Trace
            },
        );
        #[cfg(not(feature = "debug-tracing"))]
        log::set_max_level(LevelFilter::from(self.log_level()));
    }

    pub fn log_level(&self) -> LogLevel {
        self.level.load(Ordering::SeqCst).into()
    }

    /// Change the level of this logger and every clone of it.
    pub fn set_log_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::SeqCst);
        self.apply_max_level();
    }

    fn write_record(&self, writer: &mut impl Write, record: &Record) -> Option<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        write!(writer, "{} [", timestamp_to_string(now)).ok()?;
        if self.print_level {
            write!(writer, "{}", record.level()).ok()?;
        }
        write!(writer, "]: ").ok()?;
        if self.print_module_names {
            write!(writer, "{}: ", record.metadata().target()).ok()?;
        }
        writeln!(writer, "{}", record.args()).ok()?;
        writer.flush().ok()?;
        Some(())
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !matches!(self.log_level(), OFF) && metadata.level() <= Level::from(self.log_level())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        _ = self.write_record(&mut std::io::stderr().lock(), record);
    }

    fn flush(&self) {
        _ = std::io::stderr().flush();
    }
}

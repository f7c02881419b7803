//! Rotating file logger
//!
//! One file per calendar day (`YYYY-MM-DD.log`) inside the configured
//! directory, lines shaped `[HH:MM:SS] [tag] [LEVEL] message`. Every record
//! also goes to the `tracing` facade first. Nothing in here ever returns an
//! error or panics into the caller: I/O failures are reported to `tracing`
//! and dropped.

use chrono::{Local, NaiveDate, NaiveDateTime};
use privd_core::LogLevel;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoggerOptions {
    /// Mirror each file line to stdout.
    pub console: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self { console: true }
    }
}

/// `YYYY-MM-DD.log` inside `dir`.
pub fn log_file_path(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}.log", day.format("%Y-%m-%d")))
}

struct LogFile {
    dir: PathBuf,
    /// Day of the last rotation or successful write.
    day: NaiveDate,
    writer: Option<File>,
}

type ConsoleSink = Mutex<Box<dyn Write + Send>>;

struct Active {
    tag: String,
    clock: Arc<dyn Clock>,
    console: Option<ConsoleSink>,
    file: Mutex<LogFile>,
}

impl Active {
    /// Best-effort copy of a file write; a dead stdout is reported and dropped.
    fn mirror(&self, bytes: &[u8]) {
        let console = match &self.console {
            Some(console) => console,
            None => return,
        };
        let mut sink = console.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = sink.write_all(bytes).and_then(|_| sink.flush()) {
            tracing::warn!(tag = %self.tag, "console mirror failed: {}", e);
        }
    }
}

/// Leveled logger writing to the system sink and a dated file.
///
/// A disabled logger short-circuits every call before touching any state.
pub struct Logger {
    active: Option<Active>,
}

impl Logger {
    pub fn new(tag: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(tag, dir, Arc::new(SystemClock), LoggerOptions::default())
    }

    pub fn with_clock(
        tag: impl Into<String>,
        dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        options: LoggerOptions,
    ) -> Self {
        let tag = tag.into();
        let dir = dir.into();
        let today = clock.now().date();
        let mut file = LogFile {
            dir,
            day: today,
            writer: None,
        };
        if file.dir.is_file() {
            tracing::error!(tag = %tag, "log directory {} is a file", file.dir.display());
        } else if let Err(e) = std::fs::create_dir_all(&file.dir) {
            tracing::error!(tag = %tag, "cannot create log directory {}: {}", file.dir.display(), e);
        } else {
            open_for(&mut file, today, &tag);
        }
        let console: Option<ConsoleSink> = if options.console {
            Some(Mutex::new(Box::new(std::io::stdout())))
        } else {
            None
        };
        Self {
            active: Some(Active {
                tag,
                clock,
                console,
                file: Mutex::new(file),
            }),
        }
    }

    /// Mirror to `sink` instead of stdout.
    pub fn with_console(mut self, sink: Box<dyn Write + Send>) -> Self {
        if let Some(active) = self.active.as_mut() {
            active.console = Some(Mutex::new(sink));
        }
        self
    }

    pub fn disabled() -> Self {
        Self { active: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    pub fn tag(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.tag.as_str())
    }

    pub fn verbose(&self, message: impl AsRef<str>) {
        self.write_log(LogLevel::Verbose, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write_log(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write_log(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write_log(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write_log(LogLevel::Error, message.as_ref());
    }

    pub fn verbose_fmt(&self, args: fmt::Arguments<'_>) {
        self.write_fmt(LogLevel::Verbose, args);
    }

    pub fn debug_fmt(&self, args: fmt::Arguments<'_>) {
        self.write_fmt(LogLevel::Debug, args);
    }

    pub fn info_fmt(&self, args: fmt::Arguments<'_>) {
        self.write_fmt(LogLevel::Info, args);
    }

    pub fn warn_fmt(&self, args: fmt::Arguments<'_>) {
        self.write_fmt(LogLevel::Warn, args);
    }

    pub fn error_fmt(&self, args: fmt::Arguments<'_>) {
        self.write_fmt(LogLevel::Error, args);
    }

    fn write_fmt(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if self.active.is_none() {
            return;
        }
        match args.as_str() {
            Some(s) => self.write_log(level, s),
            None => self.write_log(level, &args.to_string()),
        }
    }

    /// Single funnel for every leveled write.
    pub fn write_log(&self, level: LogLevel, message: &str) {
        let active = match &self.active {
            Some(active) => active,
            None => return,
        };
        system_sink(level, &active.tag, message);

        let now = active.clock.now();
        let line = format!(
            "[{}] [{}] [{}] {}",
            now.format("%H:%M:%S"),
            active.tag,
            level,
            message
        );
        let mut file = active.file.lock().unwrap_or_else(|e| e.into_inner());
        rotate_if_needed(&mut file, now.date(), &active.tag);
        if let Some(writer) = file.writer.as_mut() {
            let written = writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .and_then(|_| writer.flush());
            match written {
                Ok(()) => {
                    file.day = now.date();
                    active.mirror(format!("{}\n", line).as_bytes());
                }
                Err(e) => tracing::error!(tag = %active.tag, "log write failed: {}", e),
            }
        }
    }

    /// Append `raw` as-is, with no timestamp, tag, level or newline.
    pub fn print(&self, raw: &str) {
        let active = match &self.active {
            Some(active) => active,
            None => return,
        };
        let today = active.clock.now().date();
        let mut file = active.file.lock().unwrap_or_else(|e| e.into_inner());
        rotate_if_needed(&mut file, today, &active.tag);
        if let Some(writer) = file.writer.as_mut() {
            match writer.write_all(raw.as_bytes()).and_then(|_| writer.flush()) {
                Ok(()) => {
                    file.day = today;
                    active.mirror(raw.as_bytes());
                }
                Err(e) => tracing::error!(tag = %active.tag, "log write failed: {}", e),
            }
        }
    }

    /// Release the file handle. Idempotent.
    pub fn close(&self) {
        let active = match &self.active {
            Some(active) => active,
            None => return,
        };
        let mut file = active.file.lock().unwrap_or_else(|e| e.into_inner());
        close_writer(&mut file, &active.tag);
    }

    pub fn is_open(&self) -> bool {
        match &self.active {
            Some(active) => active
                .file
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .writer
                .is_some(),
            None => false,
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("tag", &self.tag())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn system_sink(level: LogLevel, tag: &str, message: &str) {
    match level {
        LogLevel::Verbose => tracing::trace!(tag, "{}", message),
        LogLevel::Debug => tracing::debug!(tag, "{}", message),
        LogLevel::Info => tracing::info!(tag, "{}", message),
        LogLevel::Warn => tracing::warn!(tag, "{}", message),
        LogLevel::Error => tracing::error!(tag, "{}", message),
    }
}

// Full-date comparison; a day-of-month check would miss a rollover after a
// month of silence.
fn rotate_if_needed(file: &mut LogFile, today: NaiveDate, tag: &str) {
    if file.day != today {
        open_for(file, today, tag);
    }
}

fn open_for(file: &mut LogFile, day: NaiveDate, tag: &str) {
    close_writer(file, tag);
    let path = log_file_path(&file.dir, day);
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(writer) => file.writer = Some(writer),
        Err(e) => tracing::error!(tag, "cannot open log file {}: {}", path.display(), e),
    }
}

fn close_writer(file: &mut LogFile, tag: &str) {
    if let Some(mut writer) = file.writer.take() {
        if let Err(e) = writer.flush() {
            tracing::error!(tag, "log flush on close failed: {}", e);
        }
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::MakeWriter;

pub const LOG_FILE_PREFIX: &str = "dingbridge-";
pub const LOG_FILE_SUFFIX: &str = ".log";
pub const LOG_RETENTION_DAYS: i64 = 30;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// File logging for service mode: one file per UTC day under `<runtime_data_dir>/logs`.
pub fn init_logging(runtime_data_dir: &str) -> Result<()> {
    let log_dir = PathBuf::from(runtime_data_dir).join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    cleanup_old_logs(&log_dir, Utc::now(), LOG_RETENTION_DAYS)?;

    let writer = DailyLogWriter::open(log_dir, LOG_RETENTION_DAYS)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(())
}

pub fn init_console_logging() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

#[derive(Debug)]
struct OpenDay {
    day: NaiveDate,
    file: File,
}

#[derive(Clone, Debug)]
struct DailyLogWriter {
    log_dir: PathBuf,
    retention_days: i64,
    current: Arc<Mutex<OpenDay>>,
}

impl DailyLogWriter {
    fn open(log_dir: PathBuf, retention_days: i64) -> Result<Self> {
        let day = Utc::now().date_naive();
        let file = open_day_file(&log_dir, day)
            .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
        Ok(Self {
            log_dir,
            retention_days,
            current: Arc::new(Mutex::new(OpenDay { day, file })),
        })
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = DailyLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let now = Utc::now();
        let today = now.date_naive();
        let mut current = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;

        if current.day != today {
            current.file.flush()?;
            current.file = open_day_file(&self.log_dir, today)?;
            current.day = today;
            let _ = cleanup_old_logs(&self.log_dir, now, self.retention_days);
        }
        current.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?
            .file
            .flush()
    }
}

fn log_file_path(log_dir: &Path, day: NaiveDate) -> PathBuf {
    log_dir.join(format!(
        "{LOG_FILE_PREFIX}{}{LOG_FILE_SUFFIX}",
        day.format("%Y-%m-%d")
    ))
}

fn open_day_file(log_dir: &Path, day: NaiveDate) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(log_dir, day))
}

fn parse_log_file_day(file_name: &str) -> Option<NaiveDate> {
    let body = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}

/// Remove log files whose day is older than `retention_days` before `now`.
pub fn cleanup_old_logs(log_dir: &Path, now: DateTime<Utc>, retention_days: i64) -> Result<()> {
    let cutoff = (now - Duration::days(retention_days)).date_naive();
    let entries = match fs::read_dir(log_dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log_dir.display())),
    };

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(day) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(parse_log_file_day)
        else {
            continue;
        };
        if day < cutoff {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

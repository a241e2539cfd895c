use std::error::Error;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use tracing_appender::rolling::Rotation;

/// Where and how the file log is written
#[derive(Clone, Debug)]
pub struct LogFile<'a> {
    pub dir: &'a Path,
    pub filename: &'a str,
    pub rotation: Rotation,
    /// Rotated files to keep, 0 keeps all
    pub max_files: usize,
}

impl<'a> LogFile<'a> {
    /// A single file that is never rotated
    pub fn new(dir: &'a Path, filename: &'a str) -> Self {
        LogFile { dir, filename, rotation: Rotation::NEVER, max_files: 0 }
    }
}

/** create a non blocking tracing file appender, rotated and pruned per `log_file` */
pub fn setup_file_appender(log_file: &LogFile) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let mut builder = RollingFileAppender::builder()
        .rotation(log_file.rotation.clone())
        .filename_prefix(log_file.filename);
    if log_file.max_files > 0 {
        builder = builder.max_log_files(log_file.max_files);
    }
    let file_appender = builder.build(log_file.dir)?;

    Ok(tracing_appender::non_blocking(file_appender))
}

/** RUST_LOG env based log filter, falling back to the given directives */
pub fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/**
 * Initialize tracing-subscriber with an env filter, RUST_LOG taking precedence over
 * `default_directives`.
 * fmt layer is used to print logs to stdout.
 * If `log_file` is given, a second fmt layer writes to that file.
 * `log` records from library crates are bridged by tracing-log.
 */
pub fn init_tracing_subscriber(
    log_file: Option<&LogFile>,
    default_directives: &str,
) -> Result<LogGuard, Box<dyn Error>> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .with_target(true)
        .with_source_location(false)
        .compact();

    let stdout_layer = fmt::layer().event_format(format.clone()).with_writer(std::io::stdout);

    let (file_layer, file_guard) = match log_file {
        Some(log_file) => {
            let (writer, guard) = setup_file_appender(log_file)?;
            let layer =
                fmt::layer().event_format(format.with_ansi(false)).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(env_filter(default_directives));

    match subscriber.try_init() {
        Ok(_) => Ok(LogGuard::new(file_guard)),
        Err(err) => Err(Box::new(err)),
    }
}

/// Flushes the file log when dropped; keep it alive for the life of the process
pub struct LogGuard {
    _file_appender_guard: Option<WorkerGuard>,
}

impl LogGuard {
    pub fn new(file_appender_guard: Option<WorkerGuard>) -> Self {
        Self { _file_appender_guard: file_appender_guard }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_file_appender() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("test.log");
        {
            let log_file = LogFile::new(dir.path(), "test.log");
            let (file_writer, _file_guard) = setup_file_appender(&log_file).unwrap();
            let subscriber = tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(file_writer))
                .with(EnvFilter::new("info"));
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!("test random date: 11/08/2001");
                tracing::debug!("filtered out");
            });
        }
        let contents = std::fs::read_to_string(&file_path).expect("failed to read file");
        assert!(contents.contains("test random date: 11/08/2001"));
        assert!(!contents.contains("filtered out"));
    }

    #[test]
    fn test_rotated_file_appender() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log_file = LogFile {
                dir: dir.path(),
                filename: "test.log",
                rotation: Rotation::DAILY,
                max_files: 3,
            };
            let (file_writer, _file_guard) = setup_file_appender(&log_file).unwrap();
            let subscriber = tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(file_writer));
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!("dated file");
            });
        }
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        // the date is appended to the prefix
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("test.log."), "{:?}", names);
        let contents = std::fs::read_to_string(dir.path().join(&names[0])).unwrap();
        assert!(contents.contains("dated file"));
    }

    #[test]
    fn test_missing_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        // a regular file where the directory should be
        assert!(setup_file_appender(&LogFile::new(&file, "test.log")).is_err());
    }
}

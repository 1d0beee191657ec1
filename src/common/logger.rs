use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::LocalTime},
    prelude::*,
};

use crate::configs::LoggingConfig;

/// Builds the filter directive from the configured level and extra filters.
fn filter_directive(config: Option<&LoggingConfig>) -> String {
    let level = config
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");
    let filters = config.and_then(|l| l.filters.as_deref()).unwrap_or("");

    if filters.is_empty() {
        level.to_string()
    } else {
        format!("{},{}", level, filters)
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: Option<&LoggingConfig>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let stdout_layer = fmt::layer()
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(false);

    let file_layer = config.and_then(|l| l.file.as_ref()).map(|file| {
        if let Some(parent) = Path::new(&file.path).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }
        fmt::layer()
            .with_writer(BoundedFileWriter::new(file.path.clone(), file.max_lines))
            .with_timer(LocalTime::rfc_3339())
            .with_target(true)
            .with_line_number(true)
            .with_ansi(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}

/// Appends to a log file and trims the oldest lines once it grows past
/// `max_lines`.
#[derive(Clone)]
pub(crate) struct BoundedFileWriter {
    path: PathBuf,
    max_lines: u32,
    lines_since_trim: Arc<Mutex<u32>>,
}

impl BoundedFileWriter {
    fn new(path: impl Into<PathBuf>, max_lines: u32) -> Self {
        Self {
            path: path.into(),
            max_lines,
            lines_since_trim: Arc::new(Mutex::new(0)),
        }
    }

    fn trim(&self) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let lines: Vec<String> = BufReader::new(File::open(&self.path)?)
            .lines()
            .collect::<Result<_, _>>()?;

        let keep = self.max_lines as usize;
        if lines.len() > keep {
            let mut file = File::create(&self.path)?;
            for line in &lines[lines.len() - keep..] {
                writeln!(file, "{}", line)?;
            }
        }
        Ok(())
    }
}

impl io::Write for BoundedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(buf)?;

        let mut pending = self.lines_since_trim.lock();
        *pending += buf.iter().filter(|&&b| b == b'\n').count() as u32;

        // Trim every 10% of max_lines, at least every 50 lines.
        if *pending >= (self.max_lines / 10).max(50) {
            if let Err(e) = self.trim() {
                eprintln!("Failed to trim log file: {}", e);
            }
            *pending = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> fmt::MakeWriter<'a> for BoundedFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_defaults_to_info() {
        assert_eq!(filter_directive(None), "info");
    }

    #[test]
    fn directive_appends_filters() {
        let config = LoggingConfig {
            level: Some("debug".into()),
            filters: Some("tokio_tungstenite=warn".into()),
            file: None,
        };
        assert_eq!(
            filter_directive(Some(&config)),
            "debug,tokio_tungstenite=warn"
        );
    }

    #[test]
    fn writer_keeps_only_recent_lines() {
        let path = std::env::temp_dir().join(format!(
            "gatelink-log-{}-{}.log",
            std::process::id(),
            rand::random::<u32>()
        ));
        let mut writer = BoundedFileWriter::new(&path, 10);
        for i in 0..50 {
            writer.write_all(format!("line {}\n", i).as_bytes()).unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines.last(), Some(&"line 49"));
        let _ = fs::remove_file(&path);
    }
}

//! Process-wide logger setup.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Once;

use serde::{Deserialize, Serialize};

/// Logger configuration.
///
/// `filter` follows the `env_logger` filter syntax
/// (e.g. "info" or "snapit_editor=debug,wgpu=warn").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub filter: Option<String>,
    /// Also append records to a daily file under [`log_dir`].
    pub log_to_file: bool,
}

static INIT: Once = Once::new();

/// Writes every record to both sinks.
struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

/// Directory for editor log files (`<data_local>/snapit/logs`).
pub fn log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("snapit").join("logs"))
}

fn log_file_path() -> Option<PathBuf> {
    let dir = log_dir()?;
    std::fs::create_dir_all(&dir).ok()?;
    let name = format!("editor-{}.log", chrono::Local::now().format("%Y-%m-%d"));
    Some(dir.join(name))
}

/// Install the global logger. Idempotent; later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = &config.filter {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder
                .filter_level(log::LevelFilter::Info)
                .filter_module("wgpu_core", log::LevelFilter::Warn)
                .filter_module("wgpu_hal", log::LevelFilter::Warn)
                .filter_module("naga", log::LevelFilter::Warn);
        }

        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        });

        if config.log_to_file {
            match log_file_path()
                .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
            {
                Some(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(Tee {
                        first: io::stderr(),
                        second: file,
                    })));
                },
                None => eprintln!("snapit-editor: log file unavailable, logging to stderr"),
            }
        }

        // Another logger may already be installed by the host application.
        if builder.try_init().is_ok() {
            log::debug!("[LOG] logging initialized");
        }
    });
}

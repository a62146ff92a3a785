use crate::config::Config;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
    sync::Mutex,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "presence-hub.log";

/// Installs the global subscriber: human-readable lines on stdout plus, when
/// a log directory is configured, the same events without colour in
/// `presence-hub.log`. `RUST_LOG` overrides the configured level.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(config)));
    let file_layer = match open_log_file(Path::new(&config.log_dir)) {
        Ok(file) => file.map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        }),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
    {
        eprintln!("logging_init_error: {err}");
    }
}

fn default_level(config: &Config) -> &str {
    if config.debug {
        return "debug";
    }
    config.log_level.as_deref().unwrap_or("info")
}

/// `Ok(None)` when file logging is switched off with an empty directory.
fn open_log_file(dir: &Path) -> io::Result<Option<File>> {
    if dir.as_os_str().is_empty() || dir.to_string_lossy().trim().is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .map(Some)
}

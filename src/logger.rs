//! Session logger - routes all `tracing` output to a single file in the OS
//! data directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\CLImFractal\climfractal.log`
//!   Linux:    `~/.local/share/climfractal/climfractal.log`
//!   macOS:    `~/Library/Application Support/CLImFractal/climfractal.log`
//!
//! `RUST_LOG` overrides the default filter (`info` for this crate, `warn`
//! for wgpu/naga/eframe).  If the file cannot be opened, output goes to
//! stderr instead.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

const DEFAULT_FILTER: &str = "warn,climfractal=info";

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger.  Call once, before anything logs.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that records the panic before running the
///   previous handler.
pub fn init() {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match open_truncated(&path) {
        Ok(file) => {
            let _ = LOG_PATH.set(path.clone());
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok()
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            builder.with_writer(std::io::stderr).try_init().is_ok()
        }
    };
    if !installed {
        // Another subscriber is already active (tests, embedding host).
        return;
    }

    tracing::info!(
        "=== CLImFractal {} session started ===",
        env!("CARGO_PKG_VERSION")
    );
    if let Some(p) = log_path() {
        tracing::info!("Log file: {}", p.display());
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC: {info}");
        prev(info);
    }));
}

fn open_truncated(path: &PathBuf) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

fn log_file_path() -> PathBuf {
    #[cfg(any(target_os = "windows", target_os = "macos"))]
    let app_dir = "CLImFractal";
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let app_dir = "climfractal";
    data_dir().join(app_dir).join("climfractal.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

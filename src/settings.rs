// ============================================================================
// APP SETTINGS - persisted key=value configuration
// ============================================================================

use std::path::{Path, PathBuf};

use crate::view::{ZOOM_RATIO, valid_zoom_ratio};

pub const SETTINGS_FILE: &str = "climfractal_settings.cfg";

/// Application settings that persist across sessions
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Preferred GPU adapter name ("Auto" = first suitable adapter)
    pub preferred_gpu: String,
    /// Field grid rows (N)
    pub grid_rows: usize,
    /// Field grid columns (M)
    pub grid_cols: usize,
    /// Directory scanned for dual-field map images
    pub map_image_dir: PathBuf,
    /// Directories searched for kernel template overrides, in order
    pub kernel_search_path: Vec<PathBuf>,
    /// Start with compute enabled
    pub compute_on_start: bool,
    /// Wheel zoom ratio per tick
    pub zoom_ratio: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_gpu: "Auto".to_string(),
            grid_rows: 600,
            grid_cols: 800,
            map_image_dir: PathBuf::from("mimg"),
            kernel_search_path: Vec::new(),
            compute_on_start: false,
            zoom_ratio: ZOOM_RATIO,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/climfractal/climfractal_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\CLImFractal\climfractal_settings.cfg
    /// On macOS:   ~/Library/Application Support/CLImFractal/climfractal_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("climfractal");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_default();
            let config_dir = PathBuf::from(appdata).join("CLImFractal");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("CLImFractal");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    pub fn to_config_string(&self) -> String {
        let search_path = self
            .kernel_search_path
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "preferred_gpu={}\n\
             grid_rows={}\n\
             grid_cols={}\n\
             map_image_dir={}\n\
             kernel_search_path={search_path}\n\
             compute_on_start={}\n\
             zoom_ratio={}\n",
            self.preferred_gpu,
            self.grid_rows,
            self.grid_cols,
            self.map_image_dir.display(),
            self.compute_on_start,
            self.zoom_ratio,
        )
    }

    /// Parse settings text.  Unknown keys and malformed values fall back to
    /// the defaults.
    pub fn from_config_str(content: &str) -> Self {
        let defaults = Self::default();
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "preferred_gpu" => {
                    s.preferred_gpu = val.to_string();
                }
                "grid_rows" => {
                    s.grid_rows = val.parse::<usize>().ok().filter(|&n| n > 0).unwrap_or(defaults.grid_rows);
                }
                "grid_cols" => {
                    s.grid_cols = val.parse::<usize>().ok().filter(|&n| n > 0).unwrap_or(defaults.grid_cols);
                }
                "map_image_dir" => {
                    if !val.is_empty() {
                        s.map_image_dir = PathBuf::from(val);
                    }
                }
                "kernel_search_path" => {
                    s.kernel_search_path = val
                        .split(';')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(PathBuf::from)
                        .collect();
                }
                "compute_on_start" => {
                    s.compute_on_start = val == "true";
                }
                "zoom_ratio" => {
                    s.zoom_ratio = val
                        .parse()
                        .ok()
                        .filter(|&r: &f64| valid_zoom_ratio(r))
                        .unwrap_or(defaults.zoom_ratio);
                }
                _ => {
                    tracing::debug!(key, "ignoring unknown settings key");
                }
            }
        }
        s
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_config_string())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(err) = self.save_to(&path) {
            tracing::warn!("could not write settings to {}: {err}", path.display());
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = AppSettings {
            preferred_gpu: "Test Adapter".to_string(),
            grid_rows: 300,
            grid_cols: 400,
            map_image_dir: PathBuf::from("maps"),
            kernel_search_path: vec![PathBuf::from("kernels"), PathBuf::from("/opt/k")],
            compute_on_start: true,
            zoom_ratio: 1.25,
        };
        settings.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppSettings::load_from(&dir.path().join("nope.cfg"));
        assert_eq!(loaded, AppSettings::default());
        assert_eq!((loaded.grid_rows, loaded.grid_cols), (600, 800));
    }

    #[test]
    fn malformed_values_fall_back() {
        let s = AppSettings::from_config_str(
            "grid_rows=abc\ngrid_cols=0\nzoom_ratio=0.5\nnot a setting\nfoo=bar\n",
        );
        assert_eq!(s.grid_rows, 600);
        assert_eq!(s.grid_cols, 800);
        assert_eq!(s.zoom_ratio, ZOOM_RATIO);
    }

    #[test]
    fn empty_search_path_entries_are_dropped() {
        let s = AppSettings::from_config_str("kernel_search_path=a;; b ;\n");
        assert_eq!(s.kernel_search_path, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }
}

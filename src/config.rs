//! # Configuration Module
//!
//! Data directory layout and user settings for Voice.
//!
//! ## Data Storage
//!
//! Everything lives in the platform data directory unless `--data-dir` (or
//! `VOICE_DATA_DIR`) points somewhere else:
//! - Linux: `~/.local/share/voice/`
//! - macOS: `~/Library/Application Support/voice/`
//! - Windows: `%APPDATA%\voice\`
//!
//! ```text
//! voice/
//! ├── voice.db        book catalog
//! ├── settings.json   preferences and library folders
//! └── covers/         cover images copied by the scanner
//! ```

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::playback::PlaybackSettings;
use crate::scanner::ScanRoots;

const APP_DIR: &str = "voice";
const DB_FILE: &str = "voice.db";
const SETTINGS_FILE: &str = "settings.json";
const COVERS_DIR: &str = "covers";

/// Returns the Voice data directory, creating it if needed.
///
/// `override_dir` replaces the platform location entirely.
///
/// # Errors
///
/// This function will return an error if:
/// - No override is given and the system data directory cannot be determined
/// - The directory cannot be created due to permissions
/// - The filesystem is read-only
///
/// # Examples
///
/// ```no_run
/// use voice::config::get_data_dir;
///
/// let dir = get_data_dir(None)?;
/// println!("Data lives in {}", dir.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_data_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::data_dir()
            .ok_or_else(|| anyhow!(
                "Could not determine system data directory. Please ensure your platform supports standard data directories."
            ))?
            .join(APP_DIR),
    };

    fs::create_dir_all(&dir)
        .with_context(|| format!(
            "Failed to create Voice data directory at {}. Please check file permissions.",
            dir.display()
        ))?;
    Ok(dir)
}

/// Path of the book database inside the data directory.
pub fn get_db_path(override_dir: Option<&Path>) -> Result<PathBuf> {
    Ok(get_data_dir(override_dir)?.join(DB_FILE))
}

pub fn get_settings_path(override_dir: Option<&Path>) -> Result<PathBuf> {
    Ok(get_data_dir(override_dir)?.join(SETTINGS_FILE))
}

/// Cover image directory, created on demand.
pub fn get_covers_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = get_data_dir(override_dir)?.join(COVERS_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create covers directory at {}", dir.display()))?;
    Ok(dir)
}

/// User preferences persisted as `settings.json`.
///
/// Missing fields fall back to their defaults so older files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Skip distance in seconds.
    pub seek_time_secs: u64,
    /// Jump back on pause, in seconds.
    pub auto_rewind_secs: u64,
    /// Sleep timer length in minutes.
    pub sleep_time_mins: u64,
    /// Position updater period in milliseconds.
    pub tick_interval_ms: u64,
    /// Entries that are one book each.
    pub single_book_folders: Vec<PathBuf>,
    /// Folders holding one book per child.
    pub collection_book_folders: Vec<PathBuf>,
    /// Last book handed to `play`.
    pub current_book: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            seek_time_secs: 20,
            auto_rewind_secs: 2,
            sleep_time_mins: 20,
            tick_interval_ms: 1_000,
            single_book_folders: Vec::new(),
            collection_book_folders: Vec::new(),
            current_book: None,
        }
    }
}

impl Settings {
    /// Reads settings from `path`, returning defaults if the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("Failed to serialise settings")?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn playback(&self) -> PlaybackSettings {
        PlaybackSettings {
            seek_time: Duration::from_secs(self.seek_time_secs),
            auto_rewind: Duration::from_secs(self.auto_rewind_secs),
            sleep_time: Duration::from_secs(self.sleep_time_mins * 60),
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
        }
    }

    pub fn scan_roots(&self) -> ScanRoots {
        ScanRoots {
            single: self.single_book_folders.clone(),
            collection: self.collection_book_folders.clone(),
        }
    }

    /// Adds a library folder, stored as an absolute path. Returns `None` if it
    /// was already configured.
    pub fn add_folder(&mut self, path: &Path, collection: bool) -> Result<Option<PathBuf>> {
        let absolute = path
            .absolutize()
            .with_context(|| format!("Failed to resolve {}", path.display()))?
            .to_path_buf();
        let folders = if collection {
            &mut self.collection_book_folders
        } else {
            &mut self.single_book_folders
        };
        if folders.contains(&absolute) {
            return Ok(None);
        }
        info!("Added library folder {}", absolute.display());
        folders.push(absolute.clone());
        Ok(Some(absolute))
    }

    /// Removes a library folder from both lists. Returns whether anything was
    /// removed.
    pub fn remove_folder(&mut self, path: &Path) -> Result<bool> {
        let absolute = path
            .absolutize()
            .with_context(|| format!("Failed to resolve {}", path.display()))?
            .to_path_buf();
        let before = self.single_book_folders.len() + self.collection_book_folders.len();
        self.single_book_folders.retain(|f| *f != absolute);
        self.collection_book_folders.retain(|f| *f != absolute);
        Ok(before != self.single_book_folders.len() + self.collection_book_folders.len())
    }
}

/// Resolved file locations for one run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub settings_path: PathBuf,
    pub covers_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn new(override_dir: Option<&Path>) -> Result<Self> {
        let data_dir = get_data_dir(override_dir)?;
        Ok(Self {
            db_path: data_dir.join(DB_FILE),
            settings_path: data_dir.join(SETTINGS_FILE),
            covers_dir: get_covers_dir(Some(&data_dir))?,
            data_dir,
        })
    }

    pub fn load_settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_path)
    }
}

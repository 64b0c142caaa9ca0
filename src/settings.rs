//! Persisted recognition settings
//!
//! Journal entries are deliberately transient, but the recognition
//! configuration survives sessions as a small JSON file in the user's
//! config directory. Missing or unparseable files fall back to defaults
//! with a warning rather than failing the session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.json";
const CONFIG_DIR_NAME: &str = "voice-journal";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    /// Recognition locale passed to the engine.
    pub locale: String,

    /// Keep the stream open across pauses instead of ending after the
    /// first phrase.
    pub continuous: bool,

    /// Surface interim results while speaking, not only final ones.
    pub interim_results: bool,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            continuous: true,
            interim_results: true,
        }
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| {
        "Could not determine config directory".to_string()
    })?;
    Ok(dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> JournalSettings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            JournalSettings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> JournalSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<JournalSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                JournalSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => JournalSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            JournalSettings::default()
        }
    }
}

pub fn save_settings(settings: &JournalSettings) -> Result<(), String> {
    let path = settings_path()?;
    save_settings_to(&path, settings)
}

pub fn save_settings_to(path: &Path, settings: &JournalSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the process dies mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempdir().expect("tempdir");
        let settings = load_settings_from(&dir.path().join("settings.json"));
        assert_eq!(settings.locale, "en-US");
        assert!(settings.continuous);
        assert!(settings.interim_results);
    }

    #[test]
    fn defaults_when_file_unparseable() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json at all").expect("write garbage");

        let settings = load_settings_from(&path);
        assert_eq!(settings.locale, "en-US");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");

        let settings = JournalSettings {
            locale: "sv-SE".to_string(),
            continuous: false,
            interim_results: false,
        };
        save_settings_to(&path, &settings).expect("save settings");

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.locale, "sv-SE");
        assert!(!loaded.continuous);
        assert!(!loaded.interim_results);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"locale":"de-DE"}"#).expect("write partial");

        let settings = load_settings_from(&path);
        assert_eq!(settings.locale, "de-DE");
        assert!(settings.continuous);
        assert!(settings.interim_results);
    }

    #[test]
    fn load_settings_resolves_a_path_and_never_fails() {
        // Exercises the dirs-based resolution; a missing config dir or
        // file falls back to defaults rather than erroring
        let settings = load_settings();
        assert!(!settings.locale.is_empty());
    }

    #[test]
    fn save_replaces_existing_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");

        save_settings_to(&path, &JournalSettings::default()).expect("first save");
        let settings = JournalSettings {
            locale: "en-GB".to_string(),
            ..JournalSettings::default()
        };
        save_settings_to(&path, &settings).expect("second save");

        assert_eq!(load_settings_from(&path).locale, "en-GB");
    }
}

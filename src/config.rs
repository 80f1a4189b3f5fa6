use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::state::GameState;

/// Player-tunable engine settings, persisted between sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub number_of_words: usize,
    pub opponent_enabled: bool,
    pub opponent_wpm: u32,
    pub randomization_enabled: bool,
    pub force_mistake_correction: bool,
    pub no_end_without_correction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            number_of_words: 50,
            opponent_enabled: true,
            opponent_wpm: 40,
            randomization_enabled: false,
            force_mistake_correction: false,
            no_end_without_correction: true,
        }
    }
}

impl Config {
    /// Copy the input policies onto a fresh round's state.
    pub fn apply_policies(&self, state: &mut GameState) {
        state.force_mistake_correction = self.force_mistake_correction;
        state.no_end_without_correction = self.no_end_without_correction;
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "keelrace") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("keelrace_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            number_of_words: 25,
            opponent_enabled: false,
            opponent_wpm: 80,
            randomization_enabled: true,
            force_mistake_correction: true,
            no_end_without_correction: false,
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let store = FileConfigStore::with_path("/nonexistent/keelrace/config.json");
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn policies_apply_to_state() {
        let cfg = Config {
            force_mistake_correction: true,
            no_end_without_correction: false,
            ..Config::default()
        };
        let mut state = GameState::new();
        cfg.apply_policies(&mut state);
        assert!(state.force_mistake_correction);
        assert!(!state.no_end_without_correction);
    }
}

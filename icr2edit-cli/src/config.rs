use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Remembered between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub last_folder: Option<PathBuf>,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl CliConfig {
    /// Note the folder of the executable and the catalog that worked with it.
    pub fn remember(&mut self, exe: &Path, catalog: &Path) {
        self.last_folder = exe.parent().map(Path::to_path_buf);
        self.catalog_path = Some(catalog.to_path_buf());
    }
}

fn config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("ICR2Edit");
    base.push("config.json");
    Some(base)
}

pub fn load_config() -> CliConfig {
    let Some(path) = config_path() else {
        return CliConfig::default();
    };
    match fs::read_to_string(&path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            CliConfig::default()
        }),
        Err(_) => CliConfig::default(),
    }
}

pub fn save_config(cfg: &CliConfig) {
    let Some(path) = config_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(cfg) {
        Ok(data) => {
            if let Err(e) = fs::write(&path, data) {
                tracing::debug!(path = %path.display(), error = %e, "could not save config");
            }
        }
        Err(e) => tracing::debug!(error = %e, "could not serialise config"),
    }
}

/// Where to look for the catalog, in order: the command line, the one used
/// last time, next to the executable, the working directory.
pub fn catalog_candidates(explicit: Option<&Path>, cfg: &CliConfig, exe: &Path) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cfg.catalog_path {
        candidates.push(path.clone());
    }
    if let Some(dir) = exe.parent() {
        candidates.push(dir.join("parameters.csv"));
    }
    candidates.push(PathBuf::from("parameters.csv"));
    candidates
}

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::db::models::CategorySet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub base_url: String,
    pub model: String,
    /// Usually supplied through `GEMINI_API_KEY` rather than the file.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-1.5-flash-latest".into(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub enabled: bool,
    pub camera_url: String,
    pub capture_interval_secs: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            camera_url: "http://localhost:8081/stream".into(),
            capture_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySettings {
    pub members: Vec<String>,
    pub catch_all: String,
}

impl Default for CategorySettings {
    fn default() -> Self {
        let defaults = CategorySet::default();
        Self {
            members: defaults.members().to_vec(),
            catch_all: defaults.catch_all().as_str().to_string(),
        }
    }
}

impl CategorySettings {
    pub fn to_set(&self) -> Result<CategorySet> {
        CategorySet::new(self.members.clone(), self.catch_all.clone())
            .context("invalid category configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub images_dir: PathBuf,
    /// Where frames grabbed from the demo camera stream are written.
    pub capture_dir: PathBuf,
    pub inference: InferenceSettings,
    pub demo: DemoSettings,
    pub categories: CategorySettings,
    /// Events older than this are pruned at startup. `None` keeps everything.
    pub retention_days: Option<u32>,
    /// How many leftover pending events are re-dispatched at startup.
    pub recover_pending_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/whatareyoudoing.sqlite3"),
            images_dir: PathBuf::from("./data/images"),
            capture_dir: env::temp_dir().join("whatareyoudoing"),
            inference: InferenceSettings::default(),
            demo: DemoSettings::default(),
            categories: CategorySettings::default(),
            retention_days: None,
            recover_pending_limit: 10,
        }
    }
}

impl Settings {
    /// Reads `path` if it exists, otherwise starts from defaults, then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            info!("No settings file at {}; using defaults", path.display());
            Settings::default()
        };

        settings.apply_env(|key| env::var(key).ok());
        settings.categories.to_set()?;
        Ok(settings)
    }

    /// Path of the settings file: `WAYD_CONFIG` or `./whatareyoudoing.json`.
    pub fn default_path() -> PathBuf {
        env::var("WAYD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("whatareyoudoing.json"))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("WAYD_DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("WAYD_IMAGES_DIR") {
            self.images_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()) {
            self.inference.api_key = Some(value);
        }
        if let Some(value) = lookup("WAYD_INFERENCE_URL") {
            self.inference.base_url = value;
        }
        if let Some(value) = lookup("WAYD_MODEL") {
            self.inference.model = value;
        }
        if let Some(value) = lookup("WAYD_DEMO_MODE") {
            self.demo.enabled = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Some(value) = lookup("WAYD_CAMERA_URL") {
            self.demo.camera_url = value;
        }
        if let Some(secs) = lookup("WAYD_CAPTURE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.demo.capture_interval_secs = secs;
        }
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.demo.capture_interval_secs.max(1))
    }
}

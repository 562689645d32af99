use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile file name in the config directory
const PROFILE_FILE: &str = "profile.json";

/// Non-secret identity persisted in plain storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    #[serde(rename = "orgId")]
    pub org_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PROFILE_FILE)
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.org_id.is_none()
    }

    /// Load the profile, `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read profile file")?;
        let profile = serde_json::from_str(&contents).context("Failed to parse profile file")?;
        Ok(Some(profile))
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(Utc::now());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).context("Failed to write profile file")?;
        Ok(())
    }

    pub fn delete(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove profile file")?;
        }
        Ok(())
    }
}

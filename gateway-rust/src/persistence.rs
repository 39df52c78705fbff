use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

// ─── Identity File ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySettings {
    pub auto_generate: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self { auto_generate: true }
    }
}

/// On-disk shape of the identity store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFile {
    #[serde(default)]
    pub current_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub settings: IdentitySettings,
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store from disk. Returns default if file missing or corrupt.
    pub async fn load(&self) -> IdentityFile {
        if !self.path.exists() {
            info!("No {} found, starting with no identity", self.path.display());
            return IdentityFile::default();
        }

        match fs::read_to_string(&self.path).await {
            Ok(data) => match serde_json::from_str::<IdentityFile>(&data) {
                Ok(file) => {
                    info!(
                        "Loaded identity store (current: {}, {} history entries, autoGenerate: {})",
                        file.current_id.as_deref().unwrap_or("none"),
                        file.history.len(),
                        file.settings.auto_generate
                    );
                    file
                }
                Err(e) => {
                    warn!("Failed to parse {}: {e}, starting with no identity", self.path.display());
                    IdentityFile::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {e}, starting with no identity", self.path.display());
                IdentityFile::default()
            }
        }
    }

    /// Write the whole store. Goes through a sibling temp file so a crash
    /// mid-write never leaves a truncated store behind.
    pub async fn save(&self, file: &IdentityFile) -> io::Result<()> {
        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await
    }
}

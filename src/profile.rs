//! The one piece of client-local persistent state: the nickname. Loaded at
//! startup, written back on every change.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MAX_NICKNAME_CHARS: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub nickname: String,
}

pub fn default_profile_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vibechat").join("profile.toml"))
}

impl Profile {
    /// Load the stored profile; a missing or unreadable file yields the
    /// default (no nickname yet).
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&raw).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "ignoring unreadable profile");
            Self::default()
        })
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn has_nickname(&self) -> bool {
        !self.nickname.trim().is_empty()
    }
}

//! Connection settings for the sync service. Values come from the config
//! file, `VIBECHAT_*` environment variables, and command-line overrides,
//! highest priority last. All three settings are required; missing any of
//! them is fatal at startup.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the sync service.
    pub server_url: String,
    /// Deployment-scoped application id namespacing the collections.
    pub app_id: String,
    /// API key identifying this deployment to the service.
    pub api_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_url: Option<String>,
    app_id: Option<String>,
    api_key: Option<String>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vibechat").join("config.toml"))
}

impl Config {
    pub fn load(path: Option<PathBuf>, server_override: Option<String>) -> Result<Self> {
        let path = path.or_else(default_config_path);

        let mut file = FileConfig::default();
        if let Some(path) = &path {
            if path.exists() {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                file = toml::from_str(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
            }
        }

        Self::resolve(file, |key| env::var(key).ok(), server_override)
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        server_override: Option<String>,
    ) -> Result<Self> {
        let server_url = server_override
            .or_else(|| env("VIBECHAT_SERVER_URL"))
            .or(file.server_url);
        let app_id = env("VIBECHAT_APP_ID").or(file.app_id);
        let api_key = env("VIBECHAT_API_KEY").or(file.api_key);

        let mut missing = Vec::new();
        if server_url.as_deref().map_or(true, str::is_empty) {
            missing.push("server_url (VIBECHAT_SERVER_URL)");
        }
        if app_id.as_deref().map_or(true, str::is_empty) {
            missing.push("app_id (VIBECHAT_APP_ID)");
        }
        if api_key.as_deref().map_or(true, str::is_empty) {
            missing.push("api_key (VIBECHAT_API_KEY)");
        }
        if !missing.is_empty() {
            bail!(
                "missing sync service configuration: {}. Add the key(s) to \
                 ~/.config/vibechat/config.toml or set the environment variable(s).",
                missing.join(", ")
            );
        }

        Ok(Self {
            server_url: server_url.unwrap_or_default(),
            app_id: app_id.unwrap_or_default(),
            api_key: api_key.unwrap_or_default(),
        })
    }
}

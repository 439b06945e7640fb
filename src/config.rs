use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "coupon-drop.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// `sqlite://path/to/file.db` or `memory://`.
    pub database_url: String,
    pub cooldown_minutes: u64,
    /// Path prefix the API routes are mounted under.
    pub api_prefix: String,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
    /// Requests per IP per window on the API; 0 disables.
    pub request_limit: u32,
    pub request_window_seconds: u64,
    /// Pool size used by `seed` when no count is given.
    pub seed_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "sqlite://coupons.db".to_string(),
            cooldown_minutes: 60,
            api_prefix: "/api".to_string(),
            trust_proxy_headers: false,
            request_limit: 100,
            request_window_seconds: 15 * 60,
            seed_count: 20,
        }
    }
}

impl Config {
    /// Read `path`, writing the defaults there first if it does not exist,
    /// then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let default = Config::default();
            let toml = toml::to_string_pretty(&default)?;
            fs::write(path, toml)
                .with_context(|| format!("Failed to write default config to {}", path.display()))?;
            info!(path = %path.display(), "Created default config");
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `PORT`, `DATABASE_URL` and `CLAIM_COOLDOWN_MINUTES`.
    pub fn apply_env<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            self.port = port.trim().parse().context("PORT must be a port number")?;
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(minutes) = var("CLAIM_COOLDOWN_MINUTES") {
            self.cooldown_minutes = minutes
                .trim()
                .parse()
                .context("CLAIM_COOLDOWN_MINUTES must be a non-negative integer")?;
        }
        Ok(())
    }
}

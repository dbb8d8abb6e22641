use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "focuscoach.toml";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub backend_url: String,
    pub anon_key: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
    pub media_bucket: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:54321".into(),
            anon_key: String::new(),
            database_url: "sqlite://./data/focuscoach.db".into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            media_bucket: "uploads".into(),
        }
    }
}

impl ClientSettings {
    /// Bound for one backend call. A send shares a single budget across its insert,
    /// profile repair and retried insert.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    backend_url: Option<String>,
    anon_key: Option<String>,
    database_url: Option<String>,
    request_timeout_secs: Option<u64>,
    media_bucket: Option<String>,
}

/// Defaults, then `focuscoach.toml` in the working directory, then the environment.
pub fn load_settings() -> ClientSettings {
    let config_path =
        std::env::var("FOCUSCOACH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let mut settings = ClientSettings::default();
    if let Err(err) = apply_file(&mut settings, Path::new(&config_path)) {
        warn!(path = %config_path, "ignoring config file: {err:#}");
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

pub fn apply_file(settings: &mut ClientSettings, path: &Path) -> anyhow::Result<()> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let file_cfg: FileSettings =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

    if let Some(v) = file_cfg.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = file_cfg.anon_key {
        settings.anon_key = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.media_bucket {
        settings.media_bucket = v;
    }
    Ok(())
}

/// `lookup` is `std::env::var` in production; tests pass a map.
pub fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

    if let Some(v) = first(&["APP__BACKEND_URL", "FOCUSCOACH_BACKEND_URL"]) {
        settings.backend_url = v;
    }
    if let Some(v) = first(&["APP__ANON_KEY", "FOCUSCOACH_ANON_KEY"]) {
        settings.anon_key = v;
    }
    if let Some(v) = first(&["APP__DATABASE_URL", "FOCUSCOACH_DATABASE_URL"]) {
        settings.database_url = v;
    }
    if let Some(v) = first(&["APP__REQUEST_TIMEOUT_SECS", "FOCUSCOACH_REQUEST_TIMEOUT_SECS"]) {
        match v.trim().parse::<u64>() {
            Ok(parsed) => settings.request_timeout_secs = parsed,
            Err(_) => warn!(value = %v, "ignoring non-numeric request timeout"),
        }
    }
    if let Some(v) = first(&["APP__MEDIA_BUCKET", "FOCUSCOACH_MEDIA_BUCKET"]) {
        settings.media_bucket = v;
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return ClientSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

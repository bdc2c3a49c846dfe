use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use shared::domain::SlideArity;
use url::Url;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub public_url: Option<String>,
    pub slide_arity: usize,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/presenter.db".into(),
            public_url: None,
            slide_arity: SlideArity::DEFAULT.get(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Partial overlay read from `server.toml`; absent keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    public_url: Option<String>,
    slide_arity: Option<usize>,
    max_upload_bytes: Option<usize>,
}

impl Settings {
    pub fn arity(&self) -> anyhow::Result<SlideArity> {
        SlideArity::new(self.slide_arity).context("invalid slide_arity setting")
    }

    /// Base URL for published image references; falls back to the bind address.
    pub fn public_url(&self) -> anyhow::Result<String> {
        let raw = match &self.public_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => format!("http://{}", self.bind_addr),
        };
        let parsed = Url::parse(&raw).with_context(|| format!("invalid public_url '{raw}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("public_url must use http or https: '{raw}'"));
        }
        Ok(parsed.as_str().trim_end_matches('/').to_string())
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = file.database_url {
            self.database_url = v;
        }
        if let Some(v) = file.public_url {
            self.public_url = Some(v);
        }
        if let Some(v) = file.slide_arity {
            self.slide_arity = v;
        }
        if let Some(v) = file.max_upload_bytes {
            self.max_upload_bytes = v;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SERVER_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("APP__BIND_ADDR") {
            self.bind_addr = v;
        }

        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("APP__DATABASE_URL") {
            self.database_url = v;
        }

        if let Some(v) = lookup("APP__PUBLIC_URL") {
            self.public_url = Some(v);
        }

        if let Some(parsed) = lookup("APP__SLIDE_ARITY").and_then(|v| v.parse::<usize>().ok()) {
            self.slide_arity = parsed;
        }
        if let Some(parsed) =
            lookup("APP__MAX_UPLOAD_BYTES").and_then(|v| v.parse::<usize>().ok())
        {
            self.max_upload_bytes = parsed;
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => settings.apply_file(file_cfg),
            Err(error) => tracing::warn!(%error, file = SETTINGS_FILE, "ignoring malformed settings file"),
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
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

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

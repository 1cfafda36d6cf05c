use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use client_core::{config::DEFAULT_BATCH_SIZE, SyncConfig};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "sync.toml";
const ENV_PREFIX: &str = "APP__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub channels: Vec<String>,
    pub batch_size: u32,
    pub request_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8443/ws".into(),
            channels: vec!["general".into()],
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout_secs: 30,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_batch_size(self.batch_size)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs.max(1)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    channels: Option<Vec<String>>,
    batch_size: Option<u32>,
    request_timeout_secs: Option<u64>,
    log_filter: Option<String>,
}

/// Defaults, then `path` if it exists, then `APP__*` environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
    }

    apply_env(&mut settings, |key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.channels {
        settings.channels = v;
    }
    if let Some(v) = file_cfg.batch_size {
        settings.batch_size = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("CHANNELS") {
        settings.channels = split_channels(&v);
    }
    if let Some(v) = var("BATCH_SIZE") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.batch_size = parsed;
        }
    }
    if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = var("LOG_FILTER") {
        settings.log_filter = v;
    }
}

fn split_channels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("./does-not-exist/sync.toml")).expect("settings");
        assert_eq!(settings.batch_size, 4);
        assert_eq!(settings.sync_config(), SyncConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("message_sync_desktop_{suffix}.toml"));
        fs::write(
            &path,
            "server_url = \"wss://chat.example.org/ws\"\nchannels = [\"dev\", \"ops\"]\nbatch_size = 10\n",
        )
        .expect("write config");

        let mut settings = Settings::default();
        let raw = fs::read_to_string(&path).expect("read config");
        apply_file(&mut settings, toml::from_str(&raw).expect("parse config"));
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.server_url, "wss://chat.example.org/ws");
        assert_eq!(settings.channels, ["dev", "ops"]);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("message_sync_desktop_bad_{suffix}.toml"));
        fs::write(&path, "batch_size = \"lots\"\n").expect("write config");

        let result = load_settings(&path);
        fs::remove_file(&path).expect("cleanup");
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_and_ignores_unparsable_numbers() {
        let vars = HashMap::from([
            ("CHANNELS", " general, random ,,"),
            ("BATCH_SIZE", "eight"),
            ("REQUEST_TIMEOUT_SECS", "5"),
        ]);
        let mut settings = Settings::default();
        apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.channels, ["general", "random"]);
        assert_eq!(settings.batch_size, 4);
        assert_eq!(
            settings.sync_config().request_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let settings = Settings {
            batch_size: 0,
            ..Settings::default()
        };
        assert_eq!(settings.sync_config().batch_size, 1);
    }
}

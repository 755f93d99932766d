use crate::radio_browser::DEFAULT_BASE;
use crate::storage::{ensure_private_dir, write_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Radio Browser mirror, or `auto` to pick one at startup.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default = "default_webhook_bind")]
    pub webhook_bind: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            supabase_url: None,
            supabase_anon_key: None,
            volume: default_volume(),
            webhook_bind: default_webhook_bind(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_BASE.to_string()
}

fn default_volume() -> f64 {
    0.7
}

fn default_webhook_bind() -> String {
    "127.0.0.1:8787".to_string()
}

impl AppConfig {
    /// Reads the config file (defaults when missing), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&config_path()?)?;
        config.apply_env(|k| std::env::var(k).ok());
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read config: {path:?}")),
        };
        let text = String::from_utf8_lossy(&bytes);
        Self::parse(&text).with_context(|| format!("Invalid config TOML: {path:?}"))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FREQHUB_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.api_base = v;
        }
        if let Some(v) = var("SUPABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.supabase_url = Some(v);
        }
        if let Some(v) = var("SUPABASE_ANON_KEY").filter(|v| !v.trim().is_empty()) {
            self.supabase_anon_key = Some(v);
        }
    }

    /// The player's volume as a float in 0..=1.
    pub fn player_volume(&self) -> f32 {
        self.volume as f32
    }

    /// Writes the volume back into the config file, leaving every other
    /// field as the file has it.
    pub fn save_volume(volume: f32) -> Result<()> {
        save_volume_at(&config_path()?, volume)
    }
}

fn save_volume_at(path: &Path, volume: f32) -> Result<()> {
    let mut on_disk = AppConfig::load_file(path)?;
    on_disk.volume = (f64::from(volume) * 100.0).round() / 100.0;

    let parent = path.parent().context("Config path has no parent")?;
    ensure_private_dir(parent)?;
    let data = toml::to_string_pretty(&on_disk).context("Failed to serialize config")?;
    write_atomic(path, data.as_bytes())
}

fn config_path() -> Result<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config"))
        })
        .context("Could not determine XDG config directory")?;
    Ok(base.join("freqhub").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.api_base, "https://de1.api.radio-browser.info");
        assert_eq!(config.volume, 0.7);
    }

    #[test]
    fn parses_partial_file() {
        let config = AppConfig::parse(
            r#"
api_base = "auto"
supabase_url = "https://project.supabase.co"
volume = 0.4
"#,
        )
        .unwrap();
        assert_eq!(config.api_base, "auto");
        assert_eq!(config.supabase_url.as_deref(), Some("https://project.supabase.co"));
        assert_eq!(config.webhook_bind, "127.0.0.1:8787");
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = AppConfig::default();
        config.apply_env(|k| match k {
            "SUPABASE_ANON_KEY" => Some("anon".to_string()),
            "FREQHUB_API_BASE" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.supabase_anon_key.as_deref(), Some("anon"));
        assert_eq!(config.api_base, DEFAULT_BASE);
    }

    #[test]
    fn saving_volume_keeps_env_values_out_of_the_file() {
        let dir = std::env::temp_dir().join(format!("freqhub-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "supabase_url = \"https://file.supabase.co\"\n").unwrap();

        let mut config = AppConfig::load_file(&path).unwrap();
        config.apply_env(|k| match k {
            "FREQHUB_API_BASE" => Some("https://override.example".to_string()),
            "SUPABASE_ANON_KEY" => Some("env-only-key".to_string()),
            _ => None,
        });
        assert_eq!(config.supabase_anon_key.as_deref(), Some("env-only-key"));

        save_volume_at(&path, 0.3).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("env-only-key"));
        assert!(!text.contains("override.example"));
        assert!(text.contains("volume = 0.3\n"), "{text}");

        let saved = AppConfig::parse(&text).unwrap();
        assert_eq!(saved.volume, 0.3);
        assert_eq!(saved.api_base, DEFAULT_BASE);
        assert_eq!(saved.supabase_url.as_deref(), Some("https://file.supabase.co"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig {
            supabase_url: Some("https://x.supabase.co".into()),
            ..AppConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(AppConfig::parse(&text).unwrap(), config);
    }
}

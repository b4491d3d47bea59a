//! Agent configuration stored as TOML under the user config directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::codec::WireFormat;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "SHELLAI_CONFIG";

/// Agent configuration (TOML).
///
/// Passed explicitly to every component that needs it. Missing fields take
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// OpenAI-compatible chat-completions endpoint.
    pub api_url: String,

    /// Bearer token for `api_url`. Usually supplied via `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub model: String,

    pub request_timeout_secs: u64,

    /// Format the model is asked to reply in. Both are always accepted.
    pub wire_format: WireFormat,

    /// Scripts are materialized (and deleted) under this directory.
    pub sandbox_dir: PathBuf,

    /// `create` actions write their files under this directory.
    pub output_dir: PathBuf,

    pub script_timeout_secs: u64,

    pub install_timeout_secs: u64,

    /// Bytes of stdout/stderr kept per stream for scripts and installers.
    pub output_limit_bytes: usize,

    /// Resubmissions allowed in one request before giving up.
    pub max_chain_iterations: u32,

    /// Conversation turns kept in each history file.
    pub history_limit: usize,

    /// Defaults to `<data_dir>/shellai`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,

    /// Attach host facts to the first request of a session.
    pub send_system_info: bool,

    /// Keep executed scripts instead of deleting them.
    pub retain_scripts: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            request_timeout_secs: 120,
            wire_format: WireFormat::Markup,
            sandbox_dir: PathBuf::from("./shell"),
            output_dir: PathBuf::from("."),
            script_timeout_secs: 300,
            install_timeout_secs: 600,
            output_limit_bytes: 100_000,
            max_chain_iterations: 5,
            history_limit: 20,
            history_dir: None,
            send_system_info: true,
            retain_scripts: false,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(anyhow!("api_url must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.script_timeout_secs == 0 {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        if self.install_timeout_secs == 0 {
            return Err(anyhow!("install_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_chain_iterations == 0 {
            return Err(anyhow!("max_chain_iterations must be > 0"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be > 0"));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory holding the chat/dev history files.
    pub fn resolved_history_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.history_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("shellai"))
            .context("no data or home directory for history files")
    }

    /// Apply environment overrides; `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = var("SHELLAI_API_URL") {
            self.api_url = url;
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = var("SHELLAI_MODEL") {
            self.model = model;
        }
        if let Some(dir) = var("SHELLAI_SANDBOX_DIR") {
            self.sandbox_dir = PathBuf::from(dir);
        }
        if let Some(format) = var("SHELLAI_WIRE_FORMAT") {
            self.wire_format = format
                .parse()
                .map_err(|err: String| anyhow!("SHELLAI_WIRE_FORMAT: {err}"))?;
        }
        Ok(())
    }

    /// Set one field from its TOML key and a string value.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| anyhow!("{key} expects a number, got `{value}`"))
        }
        fn flag(key: &str, value: &str) -> Result<bool> {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                _ => bail!("{key} expects true or false, got `{value}`"),
            }
        }

        let mut next = self.clone();
        match key {
            "api_url" => next.api_url = value.to_string(),
            "api_key" => next.api_key = Some(value.to_string()).filter(|v| !v.is_empty()),
            "model" => next.model = value.to_string(),
            "request_timeout_secs" => next.request_timeout_secs = number(key, value)?,
            "wire_format" => {
                next.wire_format = value.parse().map_err(|err: String| anyhow!(err))?;
            }
            "sandbox_dir" => next.sandbox_dir = PathBuf::from(value),
            "output_dir" => next.output_dir = PathBuf::from(value),
            "script_timeout_secs" => next.script_timeout_secs = number(key, value)?,
            "install_timeout_secs" => next.install_timeout_secs = number(key, value)?,
            "output_limit_bytes" => next.output_limit_bytes = number(key, value)?,
            "max_chain_iterations" => next.max_chain_iterations = number(key, value)?,
            "history_limit" => next.history_limit = number(key, value)?,
            "history_dir" => {
                next.history_dir = Some(PathBuf::from(value)).filter(|p| !p.as_os_str().is_empty());
            }
            "send_system_info" => next.send_system_info = flag(key, value)?,
            "retain_scripts" => next.retain_scripts = flag(key, value)?,
            other => bail!("unknown config key `{other}`"),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// TOML rendering with the API key masked.
    pub fn redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if let Some(key) = &shown.api_key {
            let visible: String = key.chars().take(4).collect();
            shown.api_key = Some(format!("{visible}****"));
        }
        toml::to_string_pretty(&shown).context("serialize config toml")
    }
}

/// `$SHELLAI_CONFIG`, else `<config_dir>/shellai/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("shellai").join("config.toml"))
        .context("no config directory for this platform; set SHELLAI_CONFIG")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let cfg = AgentConfig {
            api_key: Some("sk-test".to_string()),
            wire_format: WireFormat::Json,
            history_dir: Some(temp.path().join("history")),
            ..AgentConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "model = \"gpt-4o\"\nwire_format = \"json\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.wire_format, WireFormat::Json);
        assert_eq!(cfg.script_timeout_secs, 300);
        assert_eq!(cfg.sandbox_dir, PathBuf::from("./shell"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_chain_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_chain_iterations"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = AgentConfig::default();
        cfg.apply_env_overrides(|name| match name {
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            "SHELLAI_WIRE_FORMAT" => Some("json".to_string()),
            "SHELLAI_MODEL" => Some("  ".to_string()),
            _ => None,
        })
        .expect("overrides");
        assert_eq!(cfg.api_key.as_deref(), Some("sk-env"));
        assert_eq!(cfg.wire_format, WireFormat::Json);
        assert_eq!(cfg.model, "gpt-4");
    }

    #[test]
    fn set_key_parses_and_validates() {
        let mut cfg = AgentConfig::default();
        cfg.set_key("script_timeout_secs", "30").expect("set");
        cfg.set_key("send_system_info", "no").expect("set");
        assert_eq!(cfg.script_timeout_secs, 30);
        assert!(!cfg.send_system_info);
        assert!(cfg.set_key("history_limit", "0").is_err());
        assert!(cfg.set_key("colour", "blue").is_err());
        assert!(cfg.set_key("wire_format", "yaml").is_err());
    }

    #[test]
    fn redacted_toml_masks_key() {
        let cfg = AgentConfig {
            api_key: Some("sk-secret-value".to_string()),
            ..AgentConfig::default()
        };
        let shown = cfg.redacted_toml().expect("toml");
        assert!(shown.contains("sk-s****"));
        assert!(!shown.contains("secret"));
    }
}

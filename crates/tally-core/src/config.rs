use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::Path;

use crate::model::Currency;

/// Project-level engine switches, read from `.tally/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub requests: RequestConfig,
    #[serde(default)]
    pub violations: ViolationConfig,
    #[serde(default)]
    pub next_step: NextStepConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Receipts still being scanned always open a new ledger report.
    #[serde(default = "default_true")]
    pub new_report_for_scans: bool,
    /// Currency assumed when a request names none.
    #[serde(default = "default_currency")]
    pub default_currency: Currency,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            new_report_for_scans: default_true(),
            default_currency: default_currency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationConfig {
    /// Master switch layered over the policy tier check.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NextStepConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub engine: EngineConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

pub fn load_engine_config(project_root: &Path) -> Result<EngineConfig> {
    let path = project_root.join(".tally/config.toml");
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("tally/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let engine = load_engine_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        engine,
        user,
        resolved_output,
    })
}

fn normalize_output_mode(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pretty" | "human" => Some("pretty"),
        "text" | "table" => Some("text"),
        "json" => Some("json"),
        _ => None,
    }
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_true() -> bool {
    true
}

fn default_currency() -> Currency {
    Currency::usd()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_engine_config_uses_defaults() {
        let root = TempDir::new().expect("temp dir");
        let cfg = load_engine_config(root.path()).expect("load should succeed");
        assert!(cfg.requests.new_report_for_scans);
        assert_eq!(cfg.requests.default_currency, Currency::usd());
        assert!(cfg.violations.enabled);
        assert!(cfg.next_step.enabled);
    }

    #[test]
    fn partial_engine_config_keeps_other_defaults() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(root.path().join(".tally")).expect("mkdir");
        std::fs::write(
            root.path().join(".tally/config.toml"),
            "[violations]\nenabled = false\n\n[requests]\ndefault_currency = \"eur\"\n",
        )
        .expect("write");

        let cfg = load_engine_config(root.path()).expect("load should succeed");
        assert!(!cfg.violations.enabled);
        assert_eq!(cfg.requests.default_currency.as_str(), "EUR");
        assert!(cfg.requests.new_report_for_scans);
        assert!(cfg.next_step.enabled);
    }

    #[test]
    fn malformed_engine_config_is_an_error() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(root.path().join(".tally")).expect("mkdir");
        std::fs::write(root.path().join(".tally/config.toml"), "[requests\n").expect("write");
        let err = load_engine_config(root.path()).expect_err("should fail");
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        assert_eq!(resolve_output(true, Some("pretty"), Some("text")), "json");
    }

    #[test]
    fn env_beats_user_config() {
        assert_eq!(resolve_output(false, Some("json"), Some("text")), "text");
    }

    #[test]
    fn legacy_aliases_are_normalized() {
        assert_eq!(resolve_output(false, Some("table"), Some("human")), "pretty");
        assert_eq!(resolve_output(false, Some("human"), Some("table")), "text");
    }

    #[test]
    fn user_config_parses_output() {
        let cfg: UserConfig = toml::from_str("output = \"json\"\n").expect("parse");
        assert_eq!(cfg.output.as_deref(), Some("json"));
    }
}

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tally_core::config::{EffectiveConfig, resolve_config};
use tally_core::model::Currency;
use toml::Value;

use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show resolved or raw configuration
    Show(ShowArgs),
    /// Set a configuration key in project or user scope
    Set(SetArgs),
    /// Unset a configuration key in project or user scope
    Unset(UnsetArgs),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Show raw project config only
    #[arg(long, conflicts_with = "user")]
    project: bool,

    /// Show raw user config only
    #[arg(long)]
    user: bool,
}

#[derive(Args, Debug)]
struct SetArgs {
    #[arg(long, default_value = "project")]
    scope: ConfigScope,

    /// Key path, e.g. `violations.enabled` or `output`
    key: String,

    value: String,
}

#[derive(Args, Debug)]
struct UnsetArgs {
    #[arg(long, default_value = "project")]
    scope: ConfigScope,

    key: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ConfigScope {
    Project,
    User,
}

/// Execute `tl config`.
///
/// # Errors
///
/// Returns an error if a config file cannot be read, parsed or written, or
/// the key is not one `tl` understands.
pub fn run_config(args: &ConfigArgs, project_root: &Path, output: OutputMode) -> Result<()> {
    match &args.command {
        ConfigCommand::Show(show) => run_show(show, project_root, output),
        ConfigCommand::Set(set) => run_set(set, project_root, output),
        ConfigCommand::Unset(unset) => run_unset(unset, project_root, output),
    }
}

fn run_show(args: &ShowArgs, project_root: &Path, output: OutputMode) -> Result<()> {
    if args.project {
        let value = load_toml_table(&project_config_path(project_root))?;
        return print_toml_or_json(&value, output);
    }

    if args.user {
        let value = load_toml_table(&user_config_path()?)?;
        return print_toml_or_json(&value, output);
    }

    let effective = resolve_config(project_root, output.is_json())?;
    print_effective(&effective, output)
}

fn run_set(args: &SetArgs, project_root: &Path, output: OutputMode) -> Result<()> {
    let path = scope_path(args.scope, project_root)?;
    let mut value = load_toml_table(&path)?;
    apply_set(&mut value, args.scope, &args.key, &args.value)?;
    write_toml_table(&path, &value)?;
    render_mutation(output, "set", args.scope, &args.key)
}

fn run_unset(args: &UnsetArgs, project_root: &Path, output: OutputMode) -> Result<()> {
    let path = scope_path(args.scope, project_root)?;
    let mut value = load_toml_table(&path)?;
    apply_unset(&mut value, args.scope, &args.key)?;
    write_toml_table(&path, &value)?;
    render_mutation(output, "unset", args.scope, &args.key)
}

/// A known key: optional section plus leaf.
fn split_known_key(scope: ConfigScope, key: &str) -> Result<(Option<&str>, &str)> {
    let (section, leaf) = match key.split_once('.') {
        Some((section, leaf)) => (Some(section), leaf),
        None => (None, key),
    };

    let valid = match scope {
        ConfigScope::Project => matches!(
            (section, leaf),
            (Some("requests"), "new_report_for_scans" | "default_currency")
                | (Some("violations" | "next_step"), "enabled")
        ),
        ConfigScope::User => matches!((section, leaf), (None, "output")),
    };

    if valid {
        Ok((section, leaf))
    } else {
        bail!("Unsupported key `{key}` for {} scope", scope_label(scope));
    }
}

fn parse_value(key: &str, leaf: &str, raw: &str) -> Result<Value> {
    match leaf {
        "default_currency" => {
            let currency: Currency = raw
                .parse()
                .with_context(|| format!("{key} expects a three-letter currency code"))?;
            Ok(Value::String(currency.as_str().to_string()))
        }
        "output" => match raw.trim().to_ascii_lowercase().as_str() {
            mode @ ("pretty" | "text" | "json") => Ok(Value::String(mode.to_string())),
            _ => bail!("{key} expects pretty, text or json"),
        },
        _ => {
            let value: bool = raw
                .parse()
                .with_context(|| format!("{key} expects true or false"))?;
            Ok(Value::Boolean(value))
        }
    }
}

fn apply_set(root: &mut Value, scope: ConfigScope, key: &str, raw: &str) -> Result<()> {
    let (section, leaf) = split_known_key(scope, key)?;
    let parsed = parse_value(key, leaf, raw)?;

    let mut table = root
        .as_table_mut()
        .ok_or_else(|| anyhow!("Config root must be a TOML table"))?;

    if let Some(section) = section {
        table = table
            .entry(section.to_string())
            .or_insert_with(|| Value::Table(toml::map::Map::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow!("Section {section} must be a TOML table"))?;
    }

    table.insert(leaf.to_string(), parsed);
    Ok(())
}

fn apply_unset(root: &mut Value, scope: ConfigScope, key: &str) -> Result<()> {
    let (section, leaf) = split_known_key(scope, key)?;
    let table = root
        .as_table_mut()
        .ok_or_else(|| anyhow!("Config root must be a TOML table"))?;

    let Some(section) = section else {
        table.remove(leaf);
        return Ok(());
    };

    if let Some(section_entry) = table.get_mut(section)
        && let Some(section_table) = section_entry.as_table_mut()
    {
        section_table.remove(leaf);
        if section_table.is_empty() {
            table.remove(section);
        }
    }

    Ok(())
}

fn load_toml_table(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Table(toml::map::Map::new()));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    if !value.is_table() {
        bail!("{} must contain a top-level TOML table", path.display());
    }

    Ok(value)
}

fn write_toml_table(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let serialized = toml::to_string_pretty(value)?;
    std::fs::write(path, serialized).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_toml_or_json(value: &Value, output: OutputMode) -> Result<()> {
    match output {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputMode::Text | OutputMode::Pretty => println!("{}", toml::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_effective(value: &EffectiveConfig, output: OutputMode) -> Result<()> {
    let engine = &value.engine;
    match output {
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputMode::Text => {
            println!("resolved_output={}", value.resolved_output);
            println!(
                "requests.new_report_for_scans={}",
                engine.requests.new_report_for_scans
            );
            println!("requests.default_currency={}", engine.requests.default_currency);
            println!("violations.enabled={}", engine.violations.enabled);
            println!("next_step.enabled={}", engine.next_step.enabled);
            if let Some(out) = &value.user.output {
                println!("output={out}");
            }
        }
        OutputMode::Pretty => {
            println!("resolved_output = \"{}\"", value.resolved_output);
            println!();
            println!("[requests]");
            println!("new_report_for_scans = {}", engine.requests.new_report_for_scans);
            println!("default_currency = \"{}\"", engine.requests.default_currency);
            println!();
            println!("[violations]");
            println!("enabled = {}", engine.violations.enabled);
            println!();
            println!("[next_step]");
            println!("enabled = {}", engine.next_step.enabled);
            if let Some(out) = &value.user.output {
                println!();
                println!("# user");
                println!("output = \"{out}\"");
            }
        }
    }

    Ok(())
}

fn render_mutation(output: OutputMode, action: &str, scope: ConfigScope, key: &str) -> Result<()> {
    let scope = scope_label(scope);
    match output {
        OutputMode::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "ok": true,
                    "action": action,
                    "scope": scope,
                    "key": key,
                }))?
            );
        }
        OutputMode::Text => {
            println!("ok=true action={action} scope={scope} key={key}");
        }
        OutputMode::Pretty => {
            let title = if action == "set" { "Set" } else { "Unset" };
            println!("{title} {key} in {scope} config");
        }
    }
    Ok(())
}

fn scope_path(scope: ConfigScope, project_root: &Path) -> Result<PathBuf> {
    match scope {
        ConfigScope::Project => Ok(project_config_path(project_root)),
        ConfigScope::User => user_config_path(),
    }
}

fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".tally/config.toml")
}

fn user_config_path() -> Result<PathBuf> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("Unable to resolve user config directory"))?;
    Ok(config_dir.join("tally/config.toml"))
}

const fn scope_label(scope: ConfigScope) -> &'static str {
    match scope {
        ConfigScope::Project => "project",
        ConfigScope::User => "user",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Value {
        Value::Table(toml::map::Map::new())
    }

    #[test]
    fn set_creates_the_section() {
        let mut root = empty();
        apply_set(&mut root, ConfigScope::Project, "violations.enabled", "false").expect("set");
        assert_eq!(
            root.get("violations").and_then(|s| s.get("enabled")),
            Some(&Value::Boolean(false))
        );
    }

    #[test]
    fn currency_codes_are_normalized() {
        let mut root = empty();
        apply_set(&mut root, ConfigScope::Project, "requests.default_currency", "eur").expect("set");
        assert_eq!(
            root.get("requests").and_then(|s| s.get("default_currency")),
            Some(&Value::String("EUR".into()))
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut root = empty();
        assert!(apply_set(&mut root, ConfigScope::Project, "next_step.enabled", "maybe").is_err());
        assert!(apply_set(&mut root, ConfigScope::Project, "requests.default_currency", "dollars").is_err());
        assert!(apply_set(&mut root, ConfigScope::User, "output", "yaml").is_err());
    }

    #[test]
    fn keys_are_scoped() {
        assert!(split_known_key(ConfigScope::Project, "output").is_err());
        assert!(split_known_key(ConfigScope::User, "violations.enabled").is_err());
        assert!(split_known_key(ConfigScope::Project, "search.semantic").is_err());
    }

    #[test]
    fn unset_drops_empty_sections() {
        let mut root = empty();
        apply_set(&mut root, ConfigScope::Project, "next_step.enabled", "false").expect("set");
        apply_unset(&mut root, ConfigScope::Project, "next_step.enabled").expect("unset");
        assert!(root.get("next_step").is_none());
    }

    #[test]
    fn user_output_lives_at_the_top_level() {
        let mut root = empty();
        apply_set(&mut root, ConfigScope::User, "output", "JSON").expect("set");
        assert_eq!(root.get("output"), Some(&Value::String("json".into())));
        apply_unset(&mut root, ConfigScope::User, "output").expect("unset");
        assert!(root.get("output").is_none());
    }
}

use std::{collections::HashMap, fs, io, path::Path};

use anyhow::Context;
use serde::Serialize;
use tracing::warn;

use crate::grab::GrabPolicy;

pub const SETTINGS_FILE: &str = "param_sync.toml";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub throw_distance: f64,
    pub optimistic: bool,
    pub grab_policy: GrabPolicy,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            throw_distance: 200.0,
            optimistic: false,
            grab_policy: GrabPolicy::Allow,
            event_capacity: 1024,
        }
    }
}

/// Defaults, then `param_sync.toml` in the working directory, then the
/// environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = parse_settings_file(&raw)
                .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
            apply_overrides(&mut settings, |key| file_cfg.get(key).cloned());
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()));
        }
    }

    apply_overrides(&mut settings, |key| {
        let key = key.to_ascii_uppercase();
        std::env::var(format!("APP__{key}"))
            .or_else(|_| std::env::var(format!("PARAM_SYNC_{key}")))
            .ok()
    });

    Ok(settings)
}

fn parse_settings_file(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let table = toml::from_str::<toml::Table>(raw)?;
    Ok(table
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                toml::Value::String(v) => v,
                toml::Value::Integer(v) => v.to_string(),
                toml::Value::Float(v) => v.to_string(),
                toml::Value::Boolean(v) => v.to_string(),
                other => {
                    warn!(key = %key, value = %other, "ignoring non-scalar setting");
                    return None;
                }
            };
            Some((key, value))
        })
        .collect())
}

fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("throw") {
        match v.trim().parse::<f64>() {
            Ok(parsed) if parsed.is_finite() && parsed > 0.0 => settings.throw_distance = parsed,
            _ => warn!(value = %v, "ignoring invalid throw distance"),
        }
    }
    if let Some(v) = lookup("optimistic") {
        match v.trim().parse::<bool>() {
            Ok(parsed) => settings.optimistic = parsed,
            Err(_) => warn!(value = %v, "ignoring invalid optimistic flag"),
        }
    }
    if let Some(v) = lookup("grab_policy") {
        match GrabPolicy::parse(&v) {
            Some(policy) => settings.grab_policy = policy,
            None => warn!(value = %v, "ignoring unknown grab policy"),
        }
    }
    if let Some(v) = lookup("event_capacity") {
        match v.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.event_capacity = parsed,
            _ => warn!(value = %v, "ignoring invalid event capacity"),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

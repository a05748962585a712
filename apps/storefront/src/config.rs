use std::{fs, io, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use booking_core::{BookingOptions, FilterScope};
use serde::Deserialize;
use shared::domain::SortSpec;

pub const DEFAULT_CONFIG_FILE: &str = "storefront.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub filter_scope: FilterScope,
    pub default_sort: SortSpec,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".into(),
            request_timeout_secs: 10,
            filter_scope: FilterScope::SubjectOrLocation,
            default_sort: SortSpec::default(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn booking_options(&self) -> BookingOptions {
        BookingOptions {
            sort: self.default_sort,
            filter_scope: self.filter_scope,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_url: Option<String>,
    request_timeout_secs: Option<u64>,
    filter_scope: Option<String>,
    default_sort: Option<String>,
}

/// Defaults, then the config file, then environment overrides. An explicit
/// `path` must exist; the default `storefront.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

fn load_settings_with(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(path) {
        Ok(raw) => {
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()));
        }
    }

    apply_env(&mut settings, lookup)?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.filter_scope {
        settings.filter_scope = v.parse().map_err(|err: String| anyhow!(err))?;
    }
    if let Some(v) = file_cfg.default_sort {
        settings.default_sort = v.parse()?;
    }
    Ok(())
}

fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("STOREFRONT_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = lookup("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = v
            .parse()
            .with_context(|| format!("APP__REQUEST_TIMEOUT_SECS must be a number, got '{v}'"))?;
    }

    if let Some(v) = lookup("APP__FILTER_SCOPE") {
        settings.filter_scope = v
            .parse()
            .map_err(|err: String| anyhow!(err))
            .context("APP__FILTER_SCOPE")?;
    }

    if let Some(v) = lookup("APP__DEFAULT_SORT") {
        settings.default_sort = v.parse().context("APP__DEFAULT_SORT")?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

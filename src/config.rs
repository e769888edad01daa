#![forbid(unsafe_code)]

//! Runtime settings for the collection binaries, resolved from real
//! environment variables first and a local `.env` file second.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::tracking::TrackingSettings;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DATASET_ROOT: &str = ".";
pub const DEFAULT_TRACKING_PROJECT: &str = "youtube-thumbnails-dataset";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Platform API key; only the collection binary requires one.
    pub api_key: Option<String>,
    pub dataset_root: PathBuf,
    /// `None` disables experiment tracking.
    pub tracking: Option<TrackingSettings>,
}

impl RuntimeSettings {
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub api_key: Option<String>,
    pub dataset_root: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings(&file_vars, env_var_string, overrides))
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let api_key = overrides
        .api_key
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup));

    let dataset_root = overrides
        .dataset_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("DATASET_ROOT", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_DATASET_ROOT.to_string());

    let tracking = lookup_value("TRACKING_BASE_URL", file_vars, &env_lookup).map(|base_url| {
        TrackingSettings {
            base_url,
            api_key: lookup_value("TRACKING_API_KEY", file_vars, &env_lookup).unwrap_or_default(),
            project: lookup_value("TRACKING_PROJECT", file_vars, &env_lookup)
                .unwrap_or_else(|| DEFAULT_TRACKING_PROJECT.to_string()),
        }
    });

    RuntimeSettings {
        api_key,
        dataset_root: PathBuf::from(dataset_root),
        tracking,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_env(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None, RuntimeOverrides::default())
    }

    #[test]
    fn resolves_api_key_and_dataset_root() {
        let settings =
            settings_from("YOUTUBE_API_KEY=\"secret\"\nDATASET_ROOT=\"/data/tubeset\"\n");
        assert_eq!(settings.require_api_key().unwrap(), "secret");
        assert_eq!(settings.dataset_root, PathBuf::from("/data/tubeset"));
    }

    #[test]
    fn dataset_root_defaults_to_cwd() {
        let settings = settings_from("YOUTUBE_API_KEY=\"secret\"\n");
        assert_eq!(settings.dataset_root, PathBuf::from(DEFAULT_DATASET_ROOT));
    }

    #[test]
    fn missing_api_key_is_deferred_until_required() {
        let settings = settings_from("DATASET_ROOT=\"/data\"\n");
        assert!(settings.api_key.is_none());
        let err = settings.require_api_key().unwrap_err();
        assert!(err.to_string().contains("YOUTUBE_API_KEY"));
    }

    #[test]
    fn tracking_disabled_without_base_url() {
        let settings = settings_from("YOUTUBE_API_KEY=\"k\"\nTRACKING_API_KEY=\"t\"\n");
        assert!(settings.tracking.is_none());
    }

    #[test]
    fn tracking_settings_pick_up_defaults() {
        let settings =
            settings_from("TRACKING_BASE_URL=\"https://track.example\"\nTRACKING_API_KEY=\"t\"\n");
        let tracking = settings.tracking.unwrap();
        assert_eq!(tracking.base_url, "https://track.example");
        assert_eq!(tracking.api_key, "t");
        assert_eq!(tracking.project, DEFAULT_TRACKING_PROJECT);
    }

    #[test]
    fn env_lookup_wins_over_file_values() {
        let vars = read_env_file(
            make_env("YOUTUBE_API_KEY=\"from-file\"\nDATASET_ROOT=\"/file\"\n").path(),
        )
        .unwrap();
        let settings = build_runtime_settings(
            &vars,
            |key| {
                if key == "YOUTUBE_API_KEY" {
                    Some("from-env".to_string())
                } else {
                    None
                }
            },
            RuntimeOverrides::default(),
        );
        assert_eq!(settings.require_api_key().unwrap(), "from-env");
        assert_eq!(settings.dataset_root, PathBuf::from("/file"));
    }

    #[test]
    fn overrides_win_over_everything() {
        let mut vars = HashMap::new();
        vars.insert("YOUTUBE_API_KEY".to_string(), "file-key".to_string());
        vars.insert("DATASET_ROOT".to_string(), "/file".to_string());

        let overrides = RuntimeOverrides {
            api_key: Some("override-key".to_string()),
            dataset_root: Some(PathBuf::from("/override")),
            env_path: None,
        };
        let settings = build_runtime_settings(
            &vars,
            |key| {
                if key == "DATASET_ROOT" {
                    Some("/env".to_string())
                } else {
                    None
                }
            },
            overrides,
        );
        assert_eq!(settings.require_api_key().unwrap(), "override-key");
        assert_eq!(settings.dataset_root, PathBuf::from("/override"));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_env(
            r#"
            export YOUTUBE_API_KEY="abc"
            DATASET_ROOT='/data'
            TRACKING_PROJECT =  "thumbs"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("YOUTUBE_API_KEY").unwrap(), "abc");
        assert_eq!(vars.get("DATASET_ROOT").unwrap(), "/data");
        assert_eq!(vars.get("TRACKING_PROJECT").unwrap(), "thumbs");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let settings = settings_from("YOUTUBE_API_KEY=\"   \"\n");
        assert!(settings.api_key.is_none());
    }
}

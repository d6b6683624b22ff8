use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::endpoint::{DEFAULT_ENDPOINT_PATTERN, EndpointPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "fanload.toml";
pub const ENV_PREFIX: &str = "FANLOAD_";

/// S3 rejects parts smaller than this (except the last one).
const MIN_PART_SIZE_MB: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub rpc_bind: String,
    /// Resolve every destination to the simulated adapter.
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub transfer_timeout_secs: u64,
    pub abort_grace_secs: u64,
    pub archive_fetch_timeout_secs: u64,
    pub record_write_timeout_secs: u64,
    pub multipart_part_size_mb: usize,
    /// Regexes a destination endpoint must match.
    pub endpoint_allow_list: Vec<String>,
    pub builtin_store: BuiltinStoreConfig,
    pub validation: ValidationConfig,
    pub notifications: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("fanload.db"),
            rpc_bind: "127.0.0.1:7878".to_string(),
            simulation: false,
            verbose: false,
            json_logs: false,
            transfer_timeout_secs: 120,
            abort_grace_secs: 5,
            archive_fetch_timeout_secs: 30,
            record_write_timeout_secs: 10,
            multipart_part_size_mb: MIN_PART_SIZE_MB,
            endpoint_allow_list: vec![DEFAULT_ENDPOINT_PATTERN.to_string()],
            builtin_store: BuiltinStoreConfig::default(),
            validation: ValidationConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuiltinStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub display_name: String,
}

impl Default for BuiltinStoreConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            api_key: None,
            display_name: "Built-in store".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_files: usize,
    pub max_file_size_mb: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_file_size_mb: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

impl AppConfig {
    /// Load from `fanload.toml`, then `FANLOAD_*` env vars, then CLI overrides.
    pub fn new<T: Serialize>(cli_overrides: Option<&T>) -> Result<Self> {
        Self::load(None, cli_overrides)
    }

    pub fn load<T: Serialize>(config_file: Option<&Path>, cli_overrides: Option<&T>) -> Result<Self> {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = cli_overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.multipart_part_size_mb < MIN_PART_SIZE_MB {
            bail!("multipart_part_size_mb must be at least {}", MIN_PART_SIZE_MB);
        }
        if self.transfer_timeout_secs == 0 {
            bail!("transfer_timeout_secs must be greater than zero");
        }
        if self.validation.max_files == 0 {
            bail!("validation.max_files must be greater than zero");
        }
        EndpointPolicy::from_patterns(&self.endpoint_allow_list).context("Invalid endpoint_allow_list pattern")?;
        Ok(())
    }

    /// Effective configuration as TOML, with secrets masked.
    pub fn to_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.builtin_store.api_key.is_some() {
            shown.builtin_store.api_key = Some("<redacted>".to_string());
        }
        if shown.notifications.slack_webhook.is_some() {
            shown.notifications.slack_webhook = Some("<redacted>".to_string());
        }
        toml::to_string_pretty(&shown).context("Failed to render configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        rpc_bind: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        simulation: Option<bool>,
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.validation.max_files, 10);
        assert_eq!(config.builtin_store.display_name, "Built-in store");
    }

    #[test]
    fn layers_file_env_and_cli() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    rpc_bind = "127.0.0.1:9000"
                    transfer_timeout_secs = 30

                    [builtin_store]
                    upload_url = "https://files.example.com/upload"
                "#,
            )?;
            jail.set_env("FANLOAD_TRANSFER_TIMEOUT_SECS", "45");
            jail.set_env("FANLOAD_VALIDATION__MAX_FILES", "3");

            let overrides = Overrides {
                rpc_bind: None,
                simulation: Some(true),
            };
            let config = AppConfig::new(Some(&overrides)).map_err(|e| e.to_string())?;

            assert_eq!(config.rpc_bind, "127.0.0.1:9000");
            assert_eq!(config.transfer_timeout_secs, 45);
            assert_eq!(config.validation.max_files, 3);
            assert!(config.simulation);
            assert_eq!(
                config.builtin_store.upload_url.as_deref(),
                Some("https://files.example.com/upload")
            );
            Ok(())
        });
    }

    #[test]
    fn default_part_size_is_the_smallest_allowed() {
        let config = AppConfig::default();
        assert_eq!(config.multipart_part_size_mb, MIN_PART_SIZE_MB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_small_part_size() {
        let config = AppConfig {
            multipart_part_size_mb: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_output_masks_secrets() {
        let mut config = AppConfig::default();
        config.builtin_store.api_key = Some("super-secret".into());
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("rpc_bind"));
    }
}

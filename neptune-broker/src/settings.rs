use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing {0} environment variable")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("Provider '{0}' is not available in this build")]
    ProviderUnavailable(String),
}

/// Which process is being configured. Preprovisioning needs the cloud
/// placement settings on top of the shared ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Api,
    Preprovision,
}

/// Cloud placement for newly created clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningSettings {
    pub name_prefix: String,
    pub security_group_id: String,
    pub subnet_group_name: String,
    pub kms_key_id: String,
    /// plan -> minimum number of unclaimed instances.
    pub minimums: BTreeMap<String, u32>,
}

/// What the broker itself needs at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerSettings {
    pub region: String,
    pub account_number: String,
    pub provisioning: ProvisioningSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub provider: String,
    pub api_bind: String,
    pub run_as_cron: bool,
    pub provision_interval: Duration,
    pub broker: BrokerSettings,
}

const DEFAULT_PROVIDER: &str = "aws";
const DEFAULT_API_BIND: &str = "0.0.0.0:3000";
const DEFAULT_INTERVAL_SECS: u64 = 60;

impl Settings {
    pub fn from_env(mode: Mode) -> Result<Self, ConfigError> {
        Self::from_lookup(mode, |key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source. Empty values are
    /// treated as unset.
    pub fn from_lookup<F>(mode: Mode, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let region = require("REGION")?;
        let database_url = require("BROKER_DB")?;
        let account_number = require("ACCOUNTNUMBER")?;

        let provisioning = match mode {
            Mode::Api => ProvisioningSettings::default(),
            Mode::Preprovision => {
                let small = require("PROVISION_SMALL")?;
                let small: u32 = small.parse().map_err(|_| ConfigError::Invalid {
                    var: "PROVISION_SMALL",
                    reason: format!("'{}' is not a non-negative integer", small),
                })?;
                ProvisioningSettings {
                    name_prefix: require("NAME_PREFIX")?,
                    security_group_id: require("SECURITY_GROUP_ID")?,
                    subnet_group_name: require("SUBNET_GROUP_NAME")?,
                    kms_key_id: require("KMS_KEY_ID")?,
                    minimums: BTreeMap::from([("small".to_string(), small)]),
                }
            }
        };

        let provision_interval = match get("PROVISION_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    var: "PROVISION_INTERVAL_SECS",
                    reason: format!("'{}' is not a number of seconds", raw),
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        var: "PROVISION_INTERVAL_SECS",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_INTERVAL_SECS),
        };

        Ok(Self {
            database_url,
            provider: get("PROVIDER")
                .map(|p| p.to_lowercase())
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            api_bind: get("API_BIND").unwrap_or_else(|| DEFAULT_API_BIND.to_string()),
            run_as_cron: get("RUN_AS_CRON").is_some(),
            provision_interval,
            broker: BrokerSettings {
                region,
                account_number,
                provisioning,
            },
        })
    }
}

use std::sync::Arc;

use neptune_providers::{IdentityApi, ResourceLifecycle};

use crate::settings::{ConfigError, Settings};

pub type Providers = (Arc<dyn ResourceLifecycle>, Arc<dyn IdentityApi>);

pub struct ProviderManager;

impl ProviderManager {
    /// Build the cloud clients named by `PROVIDER`. Providers are compiled
    /// in through the `provider-*` features.
    pub async fn get_providers(settings: &Settings) -> Result<Providers, ConfigError> {
        match settings.provider.as_str() {
            #[cfg(feature = "provider-aws")]
            "aws" => {
                use neptune_providers::aws::{load_config, AwsIamProvider, AwsNeptuneProvider};
                let config = load_config(&settings.broker.region).await;
                let resources = AwsNeptuneProvider::new(
                    &config,
                    settings.broker.region.clone(),
                    settings.broker.account_number.clone(),
                );
                Ok((Arc::new(resources), Arc::new(AwsIamProvider::new(
                    &config,
                    settings.broker.account_number.clone(),
                ))))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => {
                use neptune_providers::mock::{MockIdentityApi, MockResourceLifecycle};
                tracing::warn!("using in-memory mock providers, nothing is created in the cloud");
                let resources =
                    MockResourceLifecycle::new(settings.broker.region.clone()).with_auto_available();
                Ok((Arc::new(resources), Arc::new(MockIdentityApi::new())))
            }
            other => Err(ConfigError::ProviderUnavailable(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{BrokerSettings, Settings};
    use std::time::Duration;

    fn settings(provider: &str) -> Settings {
        Settings {
            database_url: "postgres://localhost/broker".into(),
            provider: provider.into(),
            api_bind: "127.0.0.1:0".into(),
            run_as_cron: false,
            provision_interval: Duration::from_secs(60),
            broker: BrokerSettings {
                region: "us-east-1".into(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let err = ProviderManager::get_providers(&settings("gcp")).await.err();
        assert_eq!(err, Some(ConfigError::ProviderUnavailable("gcp".into())));
    }
}

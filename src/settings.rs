//! Settings fallback chain.
//!
//! A recorder setting is looked up in three places, first hit wins:
//!
//! 1. the per-run overrides carried by the [`Environment`],
//! 2. the configuration service ([`ConfigurationService::setting`]),
//! 3. the local [`RecorderConfig`].
//!
//! A value that exists but cannot be decoded into the requested type is reported and
//! the lookup moves on to the next link. Values published as JSON text (`"[\"a\"]"`)
//! are decoded as JSON.

use crate::config::RecorderConfig;
use crate::environment::Environment;
use crate::services::ConfigurationService;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Which link of the chain produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    Override,
    Service,
    Local,
}

/// Ordered lookup over the three setting sources.
pub struct SettingsChain<'a> {
    overrides: &'a BTreeMap<String, serde_json::Value>,
    service: Option<&'a dyn ConfigurationService>,
    local: serde_json::Value,
}

impl<'a> SettingsChain<'a> {
    pub fn new(
        environment: &'a Environment,
        service: Option<&'a dyn ConfigurationService>,
        config: &RecorderConfig,
    ) -> Self {
        Self {
            overrides: &environment.overrides,
            service,
            local: config.as_settings(),
        }
    }

    /// First decodable value for `key` and the link it came from.
    pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<(T, SettingSource)> {
        if let Some(value) = self.overrides.get(key) {
            if let Some(decoded) = decode(key, value, SettingSource::Override) {
                return Some((decoded, SettingSource::Override));
            }
        }

        if let Some(service) = self.service {
            match service.setting(key) {
                Ok(Some(value)) => {
                    if let Some(decoded) = decode(key, &value, SettingSource::Service) {
                        return Some((decoded, SettingSource::Service));
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(key, error = %e, "setting not available from service"),
            }
        }

        self.local
            .get(key)
            .and_then(|value| decode(key, value, SettingSource::Local))
            .map(|decoded| (decoded, SettingSource::Local))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).map(|(value, _)| value)
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }
}

fn decode<T: DeserializeOwned>(
    key: &str,
    value: &serde_json::Value,
    source: SettingSource,
) -> Option<T> {
    if let Ok(decoded) = serde_json::from_value(value.clone()) {
        return Some(decoded);
    }
    if let Some(text) = value.as_str() {
        if let Ok(decoded) = serde_json::from_str(text) {
            return Some(decoded);
        }
    }
    warn!(key, value = %value, ?source, "setting cannot be decoded");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentBuilder;
    use crate::services::MemoryConfigurationService;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;
    use tracing_test::traced_test;

    fn environment() -> Environment {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .unwrap();
        EnvironmentBuilder::new(1, start)
            .override_setting("append_entry", json!(false))
            .override_setting("compression_rank", json!("not a number"))
            .build()
    }

    #[test]
    fn override_wins_over_service_and_local() {
        let env = environment();
        let service = MemoryConfigurationService::new().with_setting("append_entry", json!(true));
        let chain = SettingsChain::new(&env, Some(&service), &RecorderConfig::default());
        assert_eq!(
            chain.lookup::<bool>("append_entry"),
            Some((false, SettingSource::Override))
        );
    }

    #[test]
    fn service_values_may_be_json_text() {
        let env = environment();
        let service = MemoryConfigurationService::new()
            .with_setting("user_components", json!("[\"base\", \"slits\"]"));
        let chain = SettingsChain::new(&env, Some(&service), &RecorderConfig::default());
        assert_eq!(
            chain.lookup::<Vec<String>>("user_components"),
            Some((vec!["base".to_string(), "slits".to_string()], SettingSource::Service))
        );
    }

    #[test]
    #[traced_test]
    fn undecodable_override_falls_through_to_local_default() {
        let env = environment();
        let chain = SettingsChain::new(&env, None, &RecorderConfig::default());
        assert_eq!(
            chain.lookup::<i32>("compression_rank"),
            Some((-1, SettingSource::Local))
        );
        assert!(logs_contain("setting cannot be decoded"));
    }

    #[test]
    fn unreachable_service_is_skipped() {
        let env = environment();
        let service = MemoryConfigurationService::new().offline();
        let chain = SettingsChain::new(&env, Some(&service), &RecorderConfig::default());
        assert_eq!(chain.get_or("dynamic_components", false), true);
        assert_eq!(chain.get::<String>("no_such_key"), None);
    }
}

//! Naming/alias service boundary.

use crate::error::ServiceError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Looks up the alias registered for a device name.
pub trait NamingService: Send + Sync {
    /// `Ok(None)` when the device has no alias.
    fn resolve_alias(&self, device: &str) -> Result<Option<String>, ServiceError>;
}

/// Alias table held in memory.
#[derive(Debug, Default)]
pub struct StaticNamingService {
    aliases: Mutex<HashMap<String, String>>,
    offline: bool,
}

impl StaticNamingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that fails every lookup, as an unreachable database would.
    pub fn offline() -> Self {
        Self {
            aliases: Mutex::new(HashMap::new()),
            offline: true,
        }
    }

    pub fn with_alias(self, device: &str, alias: &str) -> Self {
        self.insert(device, alias);
        self
    }

    pub fn insert(&self, device: &str, alias: &str) {
        if let Ok(mut aliases) = self.aliases.lock() {
            aliases.insert(device.to_string(), alias.to_string());
        }
    }
}

impl NamingService for StaticNamingService {
    fn resolve_alias(&self, device: &str) -> Result<Option<String>, ServiceError> {
        if self.offline {
            return Err(ServiceError::Unreachable("naming database".into()));
        }
        let aliases = self
            .aliases
            .lock()
            .map_err(|_| ServiceError::Unreachable("alias table poisoned".into()))?;
        Ok(aliases.get(device).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_alias() {
        let naming = StaticNamingService::new().with_alias("expchan/ct/1", "ct01");
        assert_eq!(
            naming.resolve_alias("expchan/ct/1").unwrap(),
            Some("ct01".to_string())
        );
        assert_eq!(naming.resolve_alias("expchan/ct/2").unwrap(), None);
    }

    #[test]
    fn offline_service_fails() {
        let naming = StaticNamingService::offline();
        assert!(naming.resolve_alias("expchan/ct/1").is_err());
    }
}

//! Configuration/metadata service boundary.
//!
//! The configuration service owns the component catalog. Components are named groups
//! of data sources, each tagged with an acquisition policy. The recorder only reads
//! them, except for one transient component it creates per run to cover channels no
//! curated component knows about.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Mutex;

/// Acquisition policy of a component entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Policy {
    /// Sampled once per point.
    Step,
    /// Read on demand by the client.
    Client,
    Other(String),
}

impl From<String> for Policy {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "STEP" => Policy::Step,
            "CLIENT" => Policy::Client,
            _ => Policy::Other(value),
        }
    }
}

impl From<Policy> for String {
    fn from(value: Policy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Step => f.write_str("STEP"),
            Policy::Client => f.write_str("CLIENT"),
            Policy::Other(other) => f.write_str(other),
        }
    }
}

/// One data source declared by a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    /// Channel alias the data source reads.
    pub alias: String,
    pub policy: Policy,
    /// Logical record key the entry fills, if any.
    #[serde(default)]
    pub record: Option<String>,
}

impl ComponentEntry {
    pub fn new(alias: &str, policy: Policy) -> Self {
        Self {
            alias: alias.to_string(),
            policy,
            record: None,
        }
    }

    pub fn step(alias: &str) -> Self {
        Self::new(alias, Policy::Step)
    }

    pub fn with_record(mut self, key: &str) -> Self {
        self.record = Some(key.to_string());
        self
    }
}

/// Channel description handed to the service for a transient component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicChannel {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

/// What the run-scoped dynamic component must cover.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransientComponentSpec {
    /// Data sources (aliases or raw names) not covered by any component.
    pub sources: Vec<String>,
    /// Descriptions of the channels behind `sources`.
    pub channels: Vec<DynamicChannel>,
    /// Logical record keys no component declares.
    pub keys: Vec<String>,
}

/// The external configuration service.
pub trait ConfigurationService: Send + Sync {
    fn list_components(&self) -> Result<Vec<String>, ServiceError>;

    fn list_mandatory_components(&self) -> Result<Vec<String>, ServiceError>;

    fn fetch_component(&self, name: &str) -> Result<Vec<ComponentEntry>, ServiceError>;

    /// Composite schema (XML markup) for the given components.
    fn build_schema(&self, components: &[String]) -> Result<String, ServiceError>;

    /// Registers a transient component and returns its name.
    fn create_transient_component(
        &self,
        spec: &TransientComponentSpec,
    ) -> Result<String, ServiceError>;

    fn delete_transient_component(&self, name: &str) -> Result<(), ServiceError>;

    /// Remote setting lookup; `Ok(None)` when the service does not define the key.
    fn setting(&self, _key: &str) -> Result<Option<serde_json::Value>, ServiceError> {
        Ok(None)
    }

    /// Replaces the variables substituted into component markup by `build_schema`.
    fn set_config_variables(&self, _variables: &serde_json::Value) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Catalog {
    components: BTreeMap<String, Result<Vec<ComponentEntry>, ServiceError>>,
    mandatory: Vec<String>,
    settings: BTreeMap<String, serde_json::Value>,
    transient: BTreeMap<String, TransientComponentSpec>,
    created: u64,
    schema_requests: Vec<Vec<String>>,
    /// Every variable set passed to `set_config_variables`, oldest first.
    variables: Vec<serde_json::Value>,
    offline: bool,
    reject_schema: bool,
}

/// In-memory configuration service.
#[derive(Debug, Default)]
pub struct MemoryConfigurationService {
    inner: Mutex<Catalog>,
}

impl MemoryConfigurationService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_catalog(self, f: impl FnOnce(&mut Catalog)) -> Self {
        if let Ok(mut catalog) = self.inner.lock() {
            f(&mut catalog);
        }
        self
    }

    pub fn with_component(self, name: &str, entries: Vec<ComponentEntry>) -> Self {
        self.with_catalog(|c| {
            c.components.insert(name.to_string(), Ok(entries));
        })
    }

    /// A component whose definition cannot be fetched.
    pub fn with_broken_component(self, name: &str) -> Self {
        self.with_catalog(|c| {
            c.components.insert(
                name.to_string(),
                Err(ServiceError::Rejected(format!("component '{name}' wrongly defined"))),
            );
        })
    }

    pub fn with_mandatory(self, name: &str) -> Self {
        self.with_catalog(|c| c.mandatory.push(name.to_string()))
    }

    pub fn with_setting(self, key: &str, value: serde_json::Value) -> Self {
        self.with_catalog(|c| {
            c.settings.insert(key.to_string(), value);
        })
    }

    /// Every call fails as if the service were down.
    pub fn offline(self) -> Self {
        self.with_catalog(|c| c.offline = true)
    }

    /// Schema construction fails; everything else works.
    pub fn rejecting_schema(self) -> Self {
        self.with_catalog(|c| c.reject_schema = true)
    }

    /// Names of transient components currently registered.
    pub fn transient_components(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|c| c.transient.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of transient components ever created.
    pub fn transient_created(&self) -> u64 {
        self.inner.lock().map(|c| c.created).unwrap_or(0)
    }

    /// Component lists passed to `build_schema`, in call order.
    pub fn schema_requests(&self) -> Vec<Vec<String>> {
        self.inner
            .lock()
            .map(|c| c.schema_requests.clone())
            .unwrap_or_default()
    }

    /// Config variables in effect, if any were ever set.
    pub fn config_variables(&self) -> Option<serde_json::Value> {
        self.inner.lock().ok().and_then(|c| c.variables.last().cloned())
    }

    /// Variable sets in the order they were applied.
    pub fn config_variable_history(&self) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .map(|c| c.variables.clone())
            .unwrap_or_default()
    }

    fn catalog(&self) -> Result<std::sync::MutexGuard<'_, Catalog>, ServiceError> {
        let catalog = self
            .inner
            .lock()
            .map_err(|_| ServiceError::Unreachable("catalog poisoned".into()))?;
        if catalog.offline {
            return Err(ServiceError::Unreachable("configuration service".into()));
        }
        Ok(catalog)
    }
}

impl ConfigurationService for MemoryConfigurationService {
    fn list_components(&self) -> Result<Vec<String>, ServiceError> {
        let catalog = self.catalog()?;
        Ok(catalog
            .components
            .keys()
            .chain(catalog.transient.keys())
            .cloned()
            .collect())
    }

    fn list_mandatory_components(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.catalog()?.mandatory.clone())
    }

    fn fetch_component(&self, name: &str) -> Result<Vec<ComponentEntry>, ServiceError> {
        let catalog = self.catalog()?;
        if let Some(spec) = catalog.transient.get(name) {
            return Ok(spec.sources.iter().map(|s| ComponentEntry::step(s)).collect());
        }
        catalog
            .components
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(ServiceError::NotFound(name.to_string())))
    }

    fn build_schema(&self, components: &[String]) -> Result<String, ServiceError> {
        let mut catalog = self.catalog()?;
        catalog.schema_requests.push(components.to_vec());
        if catalog.reject_schema {
            return Err(ServiceError::Rejected("cannot merge components".into()));
        }
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<definition>\n");
        let mut sources = BTreeSet::new();
        for name in components {
            let entries = match catalog.transient.get(name) {
                Some(spec) => spec.sources.clone(),
                None => match catalog.components.get(name) {
                    Some(Ok(entries)) => entries.iter().map(|e| e.alias.clone()).collect(),
                    Some(Err(e)) => return Err(e.clone()),
                    None => return Err(ServiceError::NotFound(name.clone())),
                },
            };
            xml.push_str(&format!("  <component name=\"{name}\"/>\n"));
            sources.extend(entries);
        }
        for source in sources {
            xml.push_str(&format!("  <datasource name=\"{source}\"/>\n"));
        }
        xml.push_str("</definition>\n");
        Ok(xml)
    }

    fn create_transient_component(
        &self,
        spec: &TransientComponentSpec,
    ) -> Result<String, ServiceError> {
        let mut catalog = self.catalog()?;
        catalog.created += 1;
        let name = format!("__dynamic_component_{}__", catalog.created);
        catalog.transient.insert(name.clone(), spec.clone());
        Ok(name)
    }

    fn delete_transient_component(&self, name: &str) -> Result<(), ServiceError> {
        let mut catalog = self
            .inner
            .lock()
            .map_err(|_| ServiceError::Unreachable("catalog poisoned".into()))?;
        catalog
            .transient
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    fn setting(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError> {
        Ok(self.catalog()?.settings.get(key).cloned())
    }

    fn set_config_variables(&self, variables: &serde_json::Value) -> Result<(), ServiceError> {
        self.catalog()?.variables.push(variables.clone());
        Ok(())
    }
}

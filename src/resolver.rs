//! Data-source resolution.
//!
//! Reconciles the channels measured by a run against the component catalog of the
//! configuration service. The outcome says which components supply which required
//! channels, which channels no eligible component supplies, and which logical record
//! keys no component declares. When dynamic fallback is allowed the outcome also
//! carries the description of a transient component covering everything missing,
//! so no measured value is silently dropped.
//!
//! Resolution never fails: an unreachable or broken component is logged and skipped.

use crate::alias::AliasIndex;
use crate::environment::Environment;
use crate::services::configuration::DynamicChannel;
use crate::services::{ConfigurationService, Policy, TransientComponentSpec};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Inputs of one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolutionRequest {
    /// Aliases measured this run.
    pub required: BTreeSet<String>,
    /// Components the operator selected.
    pub user: BTreeSet<String>,
    /// Components always persisted.
    pub mandatory: BTreeSet<String>,
    /// Optional components that may also supply channels.
    pub available: BTreeSet<String>,
    /// Only hits in user or mandatory components count as found.
    pub restrict_to_user_components: bool,
    pub allow_dynamic_fallback: bool,
    /// Raw names without an alias; never matchable.
    pub unaliased: BTreeSet<String>,
    /// Logical record keys requested by the run.
    pub user_keys: BTreeSet<String>,
    /// Channel descriptions keyed by alias (or raw name when unaliased), used to
    /// describe missing channels to the dynamic component.
    pub channels: BTreeMap<String, DynamicChannel>,
}

impl ResolutionRequest {
    /// Request for the channels of `environment`, as collected in `index`.
    pub fn for_run(index: &AliasIndex, environment: &Environment) -> Self {
        let mut channels = BTreeMap::new();
        for descriptor in &environment.descriptors {
            let key = index
                .aliases
                .iter()
                .find(|(_, raw)| **raw == descriptor.name)
                .map(|(alias, _)| alias.clone())
                .unwrap_or_else(|| descriptor.name.clone());
            channels.insert(
                key,
                DynamicChannel {
                    name: descriptor.name.clone(),
                    shape: descriptor.shape.clone(),
                    dtype: descriptor.dtype.name().to_string(),
                },
            );
        }
        Self {
            required: index.required(),
            unaliased: index.unaliased.clone(),
            channels,
            ..Self::default()
        }
    }

    fn is_selected(&self, component: &str) -> bool {
        self.user.contains(component) || self.mandatory.contains(component)
    }
}

/// Outcome of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Required aliases without an eligible supplier, plus all unaliased channels.
    pub missing: BTreeSet<String>,
    /// Component → required aliases it supplies (every hit, eligible or not).
    pub component_to_required: BTreeMap<String, BTreeSet<String>>,
    /// Requested record keys no component declares.
    pub missing_keys: BTreeSet<String>,
    /// Aliases with at least one eligible supplier.
    pub found: BTreeSet<String>,
    /// Transient component to create, when dynamic fallback is allowed and something
    /// is missing.
    pub dynamic: Option<TransientComponentSpec>,
}

impl Resolution {
    /// Components whose schema is persisted: mandatory and user components, plus every
    /// supplying component when not restricted to the user selection, plus the
    /// dynamic component when one was created.
    pub fn persisted_components(
        &self,
        request: &ResolutionRequest,
        dynamic: Option<&str>,
    ) -> Vec<String> {
        let mut components: BTreeSet<String> =
            request.mandatory.union(&request.user).cloned().collect();
        if !request.restrict_to_user_components {
            components.extend(self.component_to_required.keys().cloned());
        }
        components.extend(dynamic.map(str::to_string));
        components.into_iter().collect()
    }
}

/// Resolves `request` against the catalog of `service`.
pub fn resolve(service: &dyn ConfigurationService, request: &ResolutionRequest) -> Resolution {
    let mut resolution = Resolution::default();
    let mut declared_keys = BTreeSet::new();

    let candidates: BTreeSet<&String> = request
        .user
        .iter()
        .chain(&request.mandatory)
        .chain(&request.available)
        .collect();

    for component in candidates {
        let entries = match service.fetch_component(component) {
            Ok(entries) => entries,
            Err(e) => {
                if request.is_selected(component) {
                    warn!(component = %component, error = %e, "component wrongly defined, skipped");
                } else {
                    debug!(component = %component, error = %e, "optional component wrongly defined, skipped");
                }
                continue;
            }
        };
        declared_keys.extend(entries.iter().filter_map(|e| e.record.clone()));

        let eligible = !request.restrict_to_user_components || request.is_selected(component);
        for entry in entries.iter().filter(|e| e.policy == Policy::Step) {
            if !request.required.contains(&entry.alias) {
                continue;
            }
            debug!(alias = %entry.alias, component = %component, "data source found");
            resolution
                .component_to_required
                .entry(component.clone())
                .or_default()
                .insert(entry.alias.clone());
            if eligible {
                resolution.found.insert(entry.alias.clone());
            }
        }
    }

    resolution.missing = request
        .required
        .difference(&resolution.found)
        .chain(&request.unaliased)
        .cloned()
        .collect();
    resolution.missing_keys = request
        .user_keys
        .difference(&declared_keys)
        .cloned()
        .collect();

    if request.allow_dynamic_fallback {
        if !resolution.missing.is_empty() || !resolution.missing_keys.is_empty() {
            resolution.dynamic = Some(TransientComponentSpec {
                sources: resolution.missing.iter().cloned().collect(),
                channels: resolution
                    .missing
                    .iter()
                    .filter_map(|name| request.channels.get(name).cloned())
                    .collect(),
                keys: resolution.missing_keys.iter().cloned().collect(),
            });
        }
    } else {
        for channel in &resolution.missing {
            warn!(channel = %channel, "channel not covered by any component and will not be stored");
        }
    }

    resolution
}

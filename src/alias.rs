//! Raw channel identifier → short alias.
//!
//! Channel names arrive bus-rooted (`tango://host:10000/expchan/ct/1`,
//! `host:10000/expchan/ct/1`, `expchan/ct/1`) or already as aliases (`ct01`). Only
//! names containing a `/` are looked up; a leading `host:port` segment is stripped
//! first. A failed lookup is not an error: the channel stays unaliased and is still
//! recorded under its raw name.

use crate::environment::Environment;
use crate::services::NamingService;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Stateless front-end over a [`NamingService`].
#[derive(Clone)]
pub struct AliasResolver {
    naming: Arc<dyn NamingService>,
}

impl std::fmt::Debug for AliasResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasResolver").finish_non_exhaustive()
    }
}

impl AliasResolver {
    pub fn new(naming: Arc<dyn NamingService>) -> Self {
        Self { naming }
    }

    /// Alias for `raw`, or `None` when the naming service knows none or fails.
    pub fn alias_of(&self, raw: &str) -> Option<String> {
        if !raw.contains('/') {
            return Some(raw.to_string());
        }
        let device = device_path(raw);
        match self.naming.resolve_alias(&device) {
            Ok(alias) => alias,
            Err(e) => {
                debug!(channel = raw, error = %e, "alias lookup failed");
                None
            }
        }
    }

    /// Alias for `raw`, falling back to the raw name itself.
    pub fn display_name(&self, raw: &str) -> String {
        self.alias_of(raw).unwrap_or_else(|| raw.to_string())
    }

    /// Collects aliases for every channel the run references: descriptors first,
    /// then the scan moveables.
    pub fn collect(&self, environment: &Environment) -> AliasIndex {
        let mut index = AliasIndex::default();
        let names = environment
            .descriptors
            .iter()
            .map(|d| d.name.as_str())
            .chain(environment.moveables.iter().map(String::as_str));
        for raw in names {
            match self.alias_of(raw) {
                Some(alias) => {
                    index.aliases.insert(alias, raw.to_string());
                }
                None => {
                    index.unaliased.insert(raw.to_string());
                }
            }
        }
        index
    }
}

/// Strips the scheme and `host:port` segment of a bus-rooted name.
fn device_path(raw: &str) -> String {
    let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    if without_scheme.contains(':') {
        without_scheme
            .split_once('/')
            .map_or(without_scheme, |(_, rest)| rest)
            .to_string()
    } else {
        without_scheme.to_string()
    }
}

/// Aliases collected for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasIndex {
    /// alias → raw channel name.
    pub aliases: BTreeMap<String, String>,
    /// Raw names the naming service could not alias.
    pub unaliased: BTreeSet<String>,
}

impl AliasIndex {
    /// The aliased channel set, i.e. the `required` input of data-source resolution.
    pub fn required(&self) -> BTreeSet<String> {
        self.aliases.keys().cloned().collect()
    }

    /// Raw name behind an alias.
    pub fn raw(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::environment::EnvironmentBuilder;
    use crate::services::StaticNamingService;
    use chrono::{FixedOffset, TimeZone};

    fn resolver() -> AliasResolver {
        AliasResolver::new(Arc::new(
            StaticNamingService::new()
                .with_alias("expchan/ct/1", "ct01")
                .with_alias("motor/mot/1", "mot1"),
        ))
    }

    #[test]
    fn plain_names_are_already_aliases() {
        assert_eq!(resolver().alias_of("det1"), Some("det1".into()));
    }

    #[test]
    fn host_prefix_is_stripped_before_lookup() {
        let r = resolver();
        assert_eq!(r.alias_of("haso107:10000/expchan/ct/1"), Some("ct01".into()));
        assert_eq!(r.alias_of("tango://haso107:10000/expchan/ct/1"), Some("ct01".into()));
        assert_eq!(r.alias_of("expchan/ct/1"), Some("ct01".into()));
        assert_eq!(r.alias_of("expchan/ct/9"), None);
    }

    #[test]
    fn lookup_failure_means_no_alias() {
        let r = AliasResolver::new(Arc::new(StaticNamingService::offline()));
        assert_eq!(r.alias_of("expchan/ct/1"), None);
        assert_eq!(r.display_name("expchan/ct/1"), "expchan/ct/1");
    }

    #[test]
    fn collect_splits_aliased_and_unaliased_channels() {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .unwrap();
        let env = EnvironmentBuilder::new(1, start)
            .descriptor(Descriptor::new("h:1/expchan/ct/1", "float64"))
            .descriptor(Descriptor::new("h:1/expchan/ct/2", "float64"))
            .moveable("motor/mot/1")
            .build();
        let index = resolver().collect(&env);
        assert_eq!(index.raw("ct01"), Some("h:1/expchan/ct/1"));
        assert_eq!(index.raw("mot1"), Some("motor/mot/1"));
        assert!(index.unaliased.contains("h:1/expchan/ct/2"));
        assert_eq!(index.required().len(), 2);
    }
}

//! Boundaries to the external services the recorders depend on.
//!
//! - [`naming`]: raw channel identifier → short alias.
//! - [`configuration`]: component catalog, schema construction, transient components
//!   and remote settings.
//! - [`writer`]: an out-of-process container writer driven with JSON payloads.
//!
//! Each boundary is a trait with an in-memory implementation used by tests and by
//! offline replay.

pub mod configuration;
pub mod naming;
pub mod writer;

pub use configuration::{
    ComponentEntry, ConfigurationService, MemoryConfigurationService, Policy,
    TransientComponentSpec,
};
pub use naming::{NamingService, StaticNamingService};
pub use writer::{ContainerWriterService, MemoryWriterService, WriterCall};

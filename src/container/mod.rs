//! Hierarchical container abstraction.
//!
//! The NeXus-style writer talks to a [`Container`]: a tree of groups (tagged with a
//! structural class), datasets and hard links addressed by absolute `/`-separated
//! paths. Two implementations exist:
//!
//! - [`MemoryStore`]: an in-process tree, always available, inspectable from tests.
//! - [`Hdf5Provider`]: HDF5 files through the `hdf5` crate (feature `storage_hdf5`).
//!
//! Numeric data crosses this boundary as `f64`; the container converts to the
//! declared storage type when it writes.

pub mod hdf5_file;
pub mod memory;

pub use hdf5_file::Hdf5Provider;
pub use memory::{DatasetData, MemoryFile, MemoryStore};

use crate::descriptor::ElementType;
use crate::error::RecorderResult;
use std::path::Path;

/// How to open a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create, truncating any existing file.
    Create,
    /// Open read-write, creating the file when missing.
    ReadWrite,
}

/// Declaration of an extensible dataset: one leading unlimited point dimension
/// followed by the fixed per-point `shape`, chunked one point at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub path: String,
    pub dtype: ElementType,
    pub shape: Vec<usize>,
    /// Deflate level, `None` for uncompressed.
    pub compression: Option<u8>,
}

impl DatasetSpec {
    /// Shape of one chunk: `[1] + shape`.
    pub fn chunk(&self) -> Vec<usize> {
        std::iter::once(1).chain(self.shape.iter().copied()).collect()
    }

    pub fn elements_per_point(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Content of a fixed (non-extensible) dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number {
        dtype: ElementType,
        shape: Vec<usize>,
        data: Vec<f64>,
    },
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn scalar(dtype: ElementType, value: f64) -> Self {
        FieldValue::Number {
            dtype,
            shape: Vec::new(),
            data: vec![value],
        }
    }
}

/// Attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

/// An open hierarchical container.
pub trait Container: Send {
    fn file_path(&self) -> &Path;

    /// Whether a node (group, dataset or link) exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Creates a group; the parent must exist.
    fn create_group(&mut self, path: &str, class: &str) -> RecorderResult<()>;

    /// Names of the direct children of a group.
    fn children(&self, path: &str) -> RecorderResult<Vec<String>>;

    fn create_dataset(&mut self, spec: &DatasetSpec) -> RecorderResult<()>;

    /// Writes a fixed dataset.
    fn write_field(&mut self, path: &str, value: &FieldValue) -> RecorderResult<()>;

    /// Writes one point of an extensible dataset, growing it to `index + 1` points
    /// when needed. Points skipped over stay zero-filled.
    fn write_slab(&mut self, path: &str, index: u64, data: &[f64]) -> RecorderResult<()>;

    fn set_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> RecorderResult<()>;

    /// Creates a hard link at `link_path` to the node at `target`.
    fn link(&mut self, target: &str, link_path: &str) -> RecorderResult<()>;

    fn flush(&mut self) -> RecorderResult<()>;

    fn close(&mut self) -> RecorderResult<()>;
}

/// Opens containers.
pub trait ContainerProvider: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn open(&self, path: &Path, mode: OpenMode) -> RecorderResult<Box<dyn Container>>;
}

/// Joins a group path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent path of `path` (`/` for top-level nodes).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last segment of `path`.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(join("/", "entry1"), "/entry1");
        assert_eq!(join("/entry1", "title"), "/entry1/title");
        assert_eq!(parent("/entry1/title"), "/entry1");
        assert_eq!(parent("/entry1"), "/");
        assert_eq!(basename("/entry1/measurement/ct01"), "ct01");
    }

    #[test]
    fn chunk_is_one_point() {
        let spec = DatasetSpec {
            path: "/entry1/measurement/mca".into(),
            dtype: ElementType::Float32,
            shape: vec![1024],
            compression: None,
        };
        assert_eq!(spec.chunk(), vec![1, 1024]);
        assert_eq!(spec.elements_per_point(), 1024);
    }
}

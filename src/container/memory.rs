//! In-memory container store.
//!
//! Files live in a shared map keyed by path, so a container closed by one recorder
//! can be re-opened by the next run (or inspected by a test) through a clone of the
//! same [`MemoryStore`].

use super::{
    basename, parent, AttrValue, Container, ContainerProvider, DatasetSpec, FieldValue,
    OpenMode,
};
use crate::descriptor::ElementType;
use crate::error::{RecorderError, RecorderResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Data of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetData {
    pub dtype: ElementType,
    /// Per-point shape for extensible datasets, full shape otherwise.
    pub shape: Vec<usize>,
    pub extensible: bool,
    pub compression: Option<u8>,
    /// Number of points written so far (extensible datasets only).
    pub points: usize,
    pub data: Vec<f64>,
}

impl DatasetData {
    /// Elements of point `index`.
    pub fn point(&self, index: usize) -> Option<&[f64]> {
        let per_point: usize = self.shape.iter().product();
        self.data.get(index * per_point..(index + 1) * per_point)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    Group { class: String },
    Dataset(DatasetData),
    Text(String),
    Link(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    kind: NodeKind,
    attrs: BTreeMap<String, AttrValue>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attrs: BTreeMap::new(),
        }
    }
}

/// Snapshot of one in-memory file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFile {
    nodes: BTreeMap<String, Node>,
}

impl MemoryFile {
    pub fn contains(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    /// Structural class of a group.
    pub fn group_class(&self, path: &str) -> Option<&str> {
        match &self.resolve(path)?.kind {
            NodeKind::Group { class } => Some(class),
            _ => None,
        }
    }

    pub fn dataset(&self, path: &str) -> Option<&DatasetData> {
        match &self.resolve(path)?.kind {
            NodeKind::Dataset(data) => Some(data),
            _ => None,
        }
    }

    pub fn text(&self, path: &str) -> Option<&str> {
        match &self.resolve(path)?.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn attr(&self, path: &str, name: &str) -> Option<&AttrValue> {
        self.resolve(path)?.attrs.get(name)
    }

    /// Target of a link node.
    pub fn link_target(&self, path: &str) -> Option<&str> {
        match &self.nodes.get(path)?.kind {
            NodeKind::Link(target) => Some(target),
            _ => None,
        }
    }

    pub fn children(&self, path: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|p| p.as_str() != path && parent(p) == path)
            .map(|p| basename(p).to_string())
            .collect()
    }

    /// Follows links to the node they point at.
    fn resolve(&self, path: &str) -> Option<&Node> {
        let node = self.nodes.get(path)?;
        match &node.kind {
            NodeKind::Link(target) => self.nodes.get(target),
            _ => Some(node),
        }
    }

    fn resolve_mut(&mut self, path: &str) -> Option<&mut Node> {
        let target = match &self.nodes.get(path)?.kind {
            NodeKind::Link(target) => target.clone(),
            _ => path.to_string(),
        };
        self.nodes.get_mut(&target)
    }

    fn is_group(&self, path: &str) -> bool {
        path == "/" || matches!(self.resolve(path).map(|n| &n.kind), Some(NodeKind::Group { .. }))
    }

    fn insert(&mut self, path: &str, kind: NodeKind) -> RecorderResult<()> {
        if self.contains(path) {
            return Err(RecorderError::Container(format!("'{path}' already exists")));
        }
        if !self.is_group(parent(path)) {
            return Err(RecorderError::Container(format!(
                "parent group of '{path}' does not exist"
            )));
        }
        self.nodes.insert(path.to_string(), Node::new(kind));
        Ok(())
    }
}

/// Shared set of in-memory container files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<BTreeMap<PathBuf, MemoryFile>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of a file.
    pub fn file(&self, path: &Path) -> Option<MemoryFile> {
        self.files.lock().ok()?.get(path).cloned()
    }

    fn with_file<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut MemoryFile) -> RecorderResult<T>,
    ) -> RecorderResult<T> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| RecorderError::Container("memory store poisoned".into()))?;
        let file = files.get_mut(path).ok_or_else(|| {
            RecorderError::Container(format!("{} is not open", path.display()))
        })?;
        f(file)
    }
}

impl ContainerProvider for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    fn open(&self, path: &Path, mode: OpenMode) -> RecorderResult<Box<dyn Container>> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| RecorderError::Container("memory store poisoned".into()))?;
        match mode {
            OpenMode::Create => {
                files.insert(path.to_path_buf(), MemoryFile::default());
            }
            OpenMode::ReadWrite => {
                files.entry(path.to_path_buf()).or_default();
            }
        }
        Ok(Box::new(MemoryContainer {
            store: self.clone(),
            path: path.to_path_buf(),
            open: true,
        }))
    }
}

/// Handle on one file of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryContainer {
    store: MemoryStore,
    path: PathBuf,
    open: bool,
}

impl MemoryContainer {
    fn edit<T>(&self, f: impl FnOnce(&mut MemoryFile) -> RecorderResult<T>) -> RecorderResult<T> {
        if !self.open {
            return Err(RecorderError::Container(format!(
                "{} is closed",
                self.path.display()
            )));
        }
        self.store.with_file(&self.path, f)
    }
}

impl Container for MemoryContainer {
    fn file_path(&self) -> &Path {
        &self.path
    }

    fn exists(&self, path: &str) -> bool {
        self.edit(|file| Ok(file.contains(path))).unwrap_or(false)
    }

    fn create_group(&mut self, path: &str, class: &str) -> RecorderResult<()> {
        self.edit(|file| {
            file.insert(
                path,
                NodeKind::Group {
                    class: class.to_string(),
                },
            )
        })
    }

    fn children(&self, path: &str) -> RecorderResult<Vec<String>> {
        self.edit(|file| {
            if !file.is_group(path) {
                return Err(RecorderError::Container(format!("'{path}' is not a group")));
            }
            Ok(file.children(path))
        })
    }

    fn create_dataset(&mut self, spec: &DatasetSpec) -> RecorderResult<()> {
        self.edit(|file| {
            file.insert(
                &spec.path,
                NodeKind::Dataset(DatasetData {
                    dtype: spec.dtype.clone(),
                    shape: spec.shape.clone(),
                    extensible: true,
                    compression: spec.compression,
                    points: 0,
                    data: Vec::new(),
                }),
            )
        })
    }

    fn write_field(&mut self, path: &str, value: &FieldValue) -> RecorderResult<()> {
        let kind = match value {
            FieldValue::Text(text) => NodeKind::Text(text.clone()),
            FieldValue::Number { dtype, shape, data } => NodeKind::Dataset(DatasetData {
                dtype: dtype.clone(),
                shape: shape.clone(),
                extensible: false,
                compression: None,
                points: 0,
                data: data.clone(),
            }),
        };
        self.edit(|file| file.insert(path, kind))
    }

    fn write_slab(&mut self, path: &str, index: u64, data: &[f64]) -> RecorderResult<()> {
        self.edit(|file| {
            let node = file
                .resolve_mut(path)
                .ok_or_else(|| RecorderError::Container(format!("no dataset '{path}'")))?;
            let NodeKind::Dataset(dataset) = &mut node.kind else {
                return Err(RecorderError::Container(format!("'{path}' is not a dataset")));
            };
            if !dataset.extensible {
                return Err(RecorderError::Container(format!(
                    "'{path}' is not extensible"
                )));
            }
            let per_point: usize = dataset.shape.iter().product();
            if data.len() != per_point {
                return Err(RecorderError::ShapeMismatch {
                    label: basename(path).to_string(),
                    expected: per_point,
                    got: data.len(),
                });
            }
            let index = usize::try_from(index)
                .map_err(|_| RecorderError::Container(format!("point {index} out of range")))?;
            if index >= dataset.points {
                dataset.points = index + 1;
                dataset.data.resize(dataset.points * per_point, 0.0);
            }
            dataset.data[index * per_point..(index + 1) * per_point].copy_from_slice(data);
            Ok(())
        })
    }

    fn set_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> RecorderResult<()> {
        self.edit(|file| {
            let node = file
                .resolve_mut(path)
                .ok_or_else(|| RecorderError::Container(format!("no node '{path}'")))?;
            node.attrs.insert(name.to_string(), value.clone());
            Ok(())
        })
    }

    fn link(&mut self, target: &str, link_path: &str) -> RecorderResult<()> {
        self.edit(|file| {
            if !file.contains(target) {
                return Err(RecorderError::Container(format!(
                    "link target '{target}' does not exist"
                )));
            }
            let resolved = file.link_target(target).unwrap_or(target).to_string();
            file.insert(link_path, NodeKind::Link(resolved))
        })
    }

    fn flush(&mut self) -> RecorderResult<()> {
        self.edit(|_| Ok(()))
    }

    fn close(&mut self) -> RecorderResult<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(store: &MemoryStore) -> Box<dyn Container> {
        store.open(Path::new("scan.h5"), OpenMode::ReadWrite).unwrap()
    }

    #[test]
    fn groups_need_their_parent() {
        let store = MemoryStore::new();
        let mut c = open(&store);
        assert!(c.create_group("/entry1/measurement", "NXcollection").is_err());
        c.create_group("/entry1", "NXentry").unwrap();
        c.create_group("/entry1/measurement", "NXcollection").unwrap();
        assert_eq!(c.children("/entry1").unwrap(), vec!["measurement".to_string()]);
        assert!(c.create_group("/entry1", "NXentry").is_err());
    }

    #[test]
    fn slabs_grow_and_zero_fill() {
        let store = MemoryStore::new();
        let mut c = open(&store);
        c.create_group("/m", "NXcollection").unwrap();
        c.create_dataset(&DatasetSpec {
            path: "/m/mca".into(),
            dtype: ElementType::Float64,
            shape: vec![2],
            compression: None,
        })
        .unwrap();
        c.write_slab("/m/mca", 2, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            c.write_slab("/m/mca", 3, &[1.0]),
            Err(RecorderError::ShapeMismatch { expected: 2, got: 1, .. })
        ));
        c.close().unwrap();
        assert!(c.write_slab("/m/mca", 3, &[1.0, 1.0]).is_err());

        let file = store.file(Path::new("scan.h5")).unwrap();
        let ds = file.dataset("/m/mca").unwrap();
        assert_eq!(ds.points, 3);
        assert_eq!(ds.point(0), Some(&[0.0, 0.0][..]));
        assert_eq!(ds.point(2), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn links_resolve_to_their_target() {
        let store = MemoryStore::new();
        let mut c = open(&store);
        c.create_group("/a", "NXcollection").unwrap();
        c.write_field("/a/x", &FieldValue::text("hello")).unwrap();
        c.create_group("/b", "NXdata").unwrap();
        c.link("/a/x", "/b/x").unwrap();
        c.set_attr("/b/x", "signal", &AttrValue::Int(1)).unwrap();

        let file = store.file(Path::new("scan.h5")).unwrap();
        assert_eq!(file.link_target("/b/x"), Some("/a/x"));
        assert_eq!(file.text("/b/x"), Some("hello"));
        assert_eq!(file.attr("/a/x", "signal"), Some(&AttrValue::Int(1)));
        assert!(c.link("/a/missing", "/b/y").is_err());
    }

    #[test]
    fn create_mode_truncates() {
        let store = MemoryStore::new();
        let mut c = open(&store);
        c.create_group("/entry1", "NXentry").unwrap();
        assert!(store.exists(Path::new("scan.h5")));
        let c = store.open(Path::new("scan.h5"), OpenMode::Create).unwrap();
        assert!(!c.exists("/entry1"));
    }
}

//! Channel descriptors.
//!
//! A [`Descriptor`] is the immutable metadata of one measured channel: its bus-rooted
//! name, a display label, the per-point shape, the element type and a few hints used by
//! the container back-end (plot grouping, instrument linking, units, compression).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a channel.
///
/// The numeric types are the supported set. `Bool` is persisted as `Int8`. Anything
/// else is kept verbatim in `Unsupported` so it can be reported and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementType {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    Unsupported(String),
}

impl ElementType {
    /// Canonical type name (`float64`, `uint16`, ...).
    pub fn name(&self) -> &str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::UInt8 => "uint8",
            ElementType::UInt16 => "uint16",
            ElementType::UInt32 => "uint32",
            ElementType::UInt64 => "uint64",
            ElementType::Bool => "bool",
            ElementType::Unsupported(name) => name,
        }
    }

    /// Type actually written to disk, or `None` when the type cannot be persisted.
    pub fn storage_type(&self) -> Option<ElementType> {
        match self {
            ElementType::Bool => Some(ElementType::Int8),
            ElementType::Unsupported(_) => None,
            other => Some(other.clone()),
        }
    }

    /// Whether values of this type can be persisted (possibly after promotion).
    pub fn is_supported(&self) -> bool {
        self.storage_type().is_some()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::Float32 | ElementType::Float64)
    }
}

impl From<String> for ElementType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "float32" => ElementType::Float32,
            "float64" | "float" | "double" => ElementType::Float64,
            "int8" => ElementType::Int8,
            "int16" => ElementType::Int16,
            "int32" => ElementType::Int32,
            "int64" => ElementType::Int64,
            "uint8" => ElementType::UInt8,
            "uint16" => ElementType::UInt16,
            "uint32" => ElementType::UInt32,
            "uint64" => ElementType::UInt64,
            "bool" => ElementType::Bool,
            _ => ElementType::Unsupported(value),
        }
    }
}

impl From<&str> for ElementType {
    fn from(value: &str) -> Self {
        ElementType::from(value.to_string())
    }
}

impl From<ElementType> for String {
    fn from(value: ElementType) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a channel should be plotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    #[default]
    None,
    Spectrum,
    Image,
}

/// Per-channel compression override for the container back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionHint {
    /// Never compress this channel.
    Off,
    /// Always compress with deflate at the given level.
    Deflate(u8),
}

/// Metadata describing one measured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Stable, bus-rooted channel name (`tango://host:10000/expchan/ct/1` or an alias).
    pub name: String,
    /// Human label; persisted in its sanitized form.
    #[serde(default)]
    pub label: String,
    /// Per-point shape, empty for scalars.
    #[serde(default)]
    pub shape: Vec<usize>,
    pub dtype: ElementType,
    #[serde(default)]
    pub plot_axes: Vec<String>,
    #[serde(default)]
    pub plot_type: PlotKind,
    /// Path inside the instrument tree this channel belongs to.
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub compression: Option<CompressionHint>,
}

impl Descriptor {
    /// Creates a scalar descriptor whose label is derived from the name.
    pub fn new(name: impl Into<String>, dtype: impl Into<ElementType>) -> Self {
        let name = name.into();
        let label = name.rsplit('/').next().unwrap_or(&name).to_string();
        Self {
            name,
            label,
            shape: Vec::new(),
            dtype: dtype.into(),
            plot_axes: Vec::new(),
            plot_type: PlotKind::None,
            instrument: None,
            units: None,
            compression: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_plot(mut self, kind: PlotKind, axes: Vec<String>) -> Self {
        self.plot_type = kind;
        self.plot_axes = axes;
        self
    }

    pub fn with_instrument(mut self, path: impl Into<String>) -> Self {
        self.instrument = Some(path.into());
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_compression(mut self, hint: CompressionHint) -> Self {
        self.compression = Some(hint);
        self
    }

    /// Label as given, falling back to the channel name.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }

    /// Label used for columns and dataset names.
    pub fn sanitized_label(&self) -> String {
        sanitize_label(self.display_label())
    }

    /// Scalar in the sense of the text formats: no dimensions, or a single element.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty() || self.shape == [1]
    }

    /// Number of elements per point.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Turns an arbitrary label into an identifier: whitespace becomes `_`, other
/// non-alphanumeric characters are dropped and a leading digit gets a `_` prefix.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{cleaned}"),
        Some(_) => cleaned,
        None => "_".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_spaces_and_strips_symbols() {
        assert_eq!(sanitize_label("ct 01 (gated)"), "ct_01_gated");
        assert_eq!(sanitize_label("mot-1.pos"), "mot1pos");
    }

    #[test]
    fn sanitize_prefixes_leading_digit() {
        assert_eq!(sanitize_label("2theta"), "_2theta");
        assert_eq!(sanitize_label("%%"), "_");
    }

    #[test]
    fn element_type_parses_and_promotes() {
        assert_eq!(ElementType::from("float64"), ElementType::Float64);
        assert_eq!(ElementType::from("bool").storage_type(), Some(ElementType::Int8));
        let text = ElementType::from("char");
        assert!(!text.is_supported());
        assert_eq!(text.name(), "char");
    }

    #[test]
    fn element_type_serde_uses_names() {
        let json = serde_json::to_string(&ElementType::UInt16).unwrap();
        assert_eq!(json, "\"uint16\"");
        let parsed: ElementType = serde_json::from_str("\"string\"").unwrap();
        assert_eq!(parsed, ElementType::Unsupported("string".into()));
    }

    #[test]
    fn descriptor_label_defaults_to_last_name_segment() {
        let d = Descriptor::new("expchan/ct/1 gate", "float64");
        assert_eq!(d.label, "1 gate");
        assert_eq!(d.sanitized_label(), "_1_gate");
        assert!(d.is_scalar());
    }

    #[test]
    fn single_element_shape_is_scalar() {
        let d = Descriptor::new("mca01", "float32").with_shape(vec![1]);
        assert!(d.is_scalar());
        let d = d.with_shape(vec![1024]);
        assert!(!d.is_scalar());
        assert_eq!(d.element_count(), 1024);
    }
}

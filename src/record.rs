//! Per-point records.

use crate::format::python_float;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fixed-shape numeric array, stored flat in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NdArray {
    /// One-dimensional array.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Builds an array from flat data, checking the element count against the shape.
    pub fn from_shape(shape: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        (shape.iter().product::<usize>() == data.len()).then_some(Self { shape, data })
    }

    /// Converts back into nested JSON lists following the shape.
    fn to_nested(&self) -> serde_json::Value {
        fn nest(shape: &[usize], data: &[f64]) -> serde_json::Value {
            match shape.split_first() {
                None => number(data.first().copied().unwrap_or(f64::NAN)),
                Some((_, [])) => serde_json::Value::Array(data.iter().map(|v| number(*v)).collect()),
                Some((&outer, rest)) => {
                    let stride: usize = rest.iter().product();
                    serde_json::Value::Array(
                        (0..outer)
                            .map(|i| nest(rest, data.get(i * stride..(i + 1) * stride).unwrap_or(&[])))
                            .collect(),
                    )
                }
            }
        }
        nest(&self.shape, &self.data)
    }
}

fn number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// A measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// Present in the record but without a reading.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(NdArray),
}

impl Value {
    /// Numeric view of a scalar value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Array(a) if a.data.len() == 1 => a.data.first().copied(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Scalar in the sense of custom data: not an array (a one-element array counts).
    pub fn is_scalar(&self) -> bool {
        match self {
            Value::Array(a) => a.data.len() == 1,
            _ => true,
        }
    }

    /// Flat numeric elements; text and null values have none.
    pub fn elements(&self) -> Vec<f64> {
        match self {
            Value::Array(a) => a.data.clone(),
            other => other.as_f64().into_iter().collect(),
        }
    }

    /// Text rendering used by the ASCII formats (`nan` for null).
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "nan".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => python_float(*f),
            Value::Text(s) => s.clone(),
            Value::Array(a) if a.data.len() == 1 => python_float(a.data[0]),
            Value::Array(a) => format!(
                "[{}]",
                a.data.iter().map(|v| python_float(*v)).collect::<Vec<_>>().join(" ")
            ),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(NdArray::from_vec(value))
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| format!("unrepresentable number {n}")),
            },
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            serde_json::Value::Array(items) => {
                let mut flat = Flattened::default();
                flat.push(&serde_json::Value::Array(items), 0)?;
                NdArray::from_shape(flat.shape, flat.data)
                    .map(Value::Array)
                    .ok_or_else(|| RAGGED.to_string())
            }
            serde_json::Value::Object(_) => Err("objects are not valid channel values".into()),
        }
    }
}

const RAGGED: &str = "ragged arrays are not supported";

/// Nested lists flattened in row-major order.
///
/// The shape is taken from the first list at each depth; every other list at that
/// depth must have the same length and every leaf must sit at the same depth.
#[derive(Default)]
struct Flattened {
    shape: Vec<usize>,
    data: Vec<f64>,
    leaf_depth: Option<usize>,
}

impl Flattened {
    fn push(&mut self, value: &serde_json::Value, depth: usize) -> Result<(), String> {
        let leaf = match value {
            serde_json::Value::Array(items) => {
                if self.shape.len() == depth {
                    if self.leaf_depth.is_some() {
                        return Err(RAGGED.into());
                    }
                    self.shape.push(items.len());
                } else if self.shape.get(depth) != Some(&items.len()) {
                    return Err(RAGGED.into());
                }
                for item in items {
                    self.push(item, depth + 1)?;
                }
                return Ok(());
            }
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            serde_json::Value::Null => f64::NAN,
            serde_json::Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => return Err("arrays may only contain numbers".into()),
        };
        if self.shape.len() != depth || self.leaf_depth.is_some_and(|d| d != depth) {
            return Err(RAGGED.into());
        }
        self.leaf_depth = Some(depth);
        self.data.push(leaf);
        Ok(())
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => number(f),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Array(a) => a.to_nested(),
        }
    }
}

/// One acquired point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Zero-based point index; strictly increasing within a run.
    pub point_nb: u64,
    /// Channel name → value. Channels without a reading may be missing or `Null`.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(point_nb: u64) -> Self {
        Self {
            point_nb,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, channel: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(channel.into(), value.into());
        self
    }

    /// Value for a channel, treating an explicit null like a missing key.
    pub fn reading(&self, channel: &str) -> Option<&Value> {
        self.data.get(channel).filter(|v| !v.is_null())
    }

    /// Text for the ASCII formats: the rendered value, or `nan` when absent.
    pub fn text(&self, channel: &str) -> String {
        self.reading(channel)
            .map(Value::to_text)
            .unwrap_or_else(|| "nan".to_string())
    }

    /// JSON payload `{"data": {...}}` sent to a container-writer service, with
    /// arrays normalized to nested lists.
    pub fn to_payload(&self) -> serde_json::Value {
        let data: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect();
        serde_json::json!({ "data": data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_lists_into_shaped_array() {
        let v: Value = serde_json::from_str("[[1, 2, 3], [4, 5, 6]]").unwrap();
        match v {
            Value::Array(a) => {
                assert_eq!(a.shape, vec![2, 3]);
                assert_eq!(a.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn rejects_ragged_arrays() {
        let r: Result<Value, _> = serde_json::from_str("[[1, 2], [3]]");
        assert!(r.is_err());
    }

    #[test]
    fn rejects_mixed_nesting_depth() {
        for text in [
            "[[1, 2], [[3, 4], [5, 6]]]",
            "[[1, 2], [[3], [4]]]",
            "[[[1, 2], [3, 4]], [5, 6]]",
            "[1, [2]]",
        ] {
            let r: Result<Value, _> = serde_json::from_str(text);
            assert!(r.is_err(), "{text} was accepted");
        }
        let record: Result<Record, _> =
            serde_json::from_str(r#"{"point_nb": 0, "data": {"mca": [[1, 2], [[3, 4], [5, 6]]]}}"#);
        assert!(record.is_err());
    }

    #[test]
    fn payload_of_inconsistent_array_does_not_panic() {
        let array = NdArray {
            shape: vec![2, 2, 2],
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        };
        let payload = Record::new(0).with("mca", Value::Array(array)).to_payload();
        assert_eq!(payload["data"]["mca"][0], serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
        assert_eq!(payload["data"]["mca"][1][1], serde_json::json!([]));
    }

    #[test]
    fn payload_normalizes_arrays_to_nested_lists() {
        let array = NdArray::from_shape(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let record = Record::new(0)
            .with("mca", Value::Array(array))
            .with("ct", 3_i64);
        let payload = record.to_payload();
        assert_eq!(payload["data"]["mca"], serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
        assert_eq!(payload["data"]["ct"], serde_json::json!(3));
    }

    #[test]
    fn null_and_missing_render_as_nan() {
        let record = Record::new(4).with("det", Value::Null);
        assert_eq!(record.text("det"), "nan");
        assert_eq!(record.text("absent"), "nan");
    }

    #[test]
    fn record_round_trips_through_json_input() {
        let record: Record =
            serde_json::from_str(r#"{"point_nb": 2, "data": {"mot1": 1.0, "flag": true}}"#).unwrap();
        assert_eq!(record.point_nb, 2);
        assert_eq!(record.text("mot1"), "1.0");
        assert_eq!(record.text("flag"), "True");
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const PATH_DELIMITER: char = '.';

/// A dotted path into a nested value, e.g. `designTimeModel.quality.maxTokens`.
///
/// Segments are never empty. Numeric segments index into arrays when the
/// value at that position is an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments = path
            .split(PATH_DELIMITER)
            .map(str::trim)
            .map(str::to_string)
            .collect::<Vec<String>>();

        if segments.iter().any(String::is_empty) {
            return Err(Error::InvalidFieldPath(path.to_string()));
        }

        Ok(FieldPath {
            raw: segments.join("."),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when every segment of `self` is a leading segment of `other`.
    /// A path is a prefix of itself.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// The segments of `self` left after removing `prefix`, if it is one.
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<&[String]> {
        if prefix.is_prefix_of(self) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        FieldPath::parse(&value)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        FieldPath::parse(value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

/// Read the value addressed by `segments`, or `None` if any step is missing.
pub fn get_path<'a, S: AsRef<str>>(value: &'a Value, segments: &[S]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| {
        let segment = segment.as_ref();
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// Write `new_value` at `path`, creating intermediate objects where the
/// path runs through a missing, null or scalar value.
pub fn set_path(target: &mut Value, path: &FieldPath, new_value: Value) -> Result<()> {
    set_segments(target, path.segments(), path, new_value)
}

pub(crate) fn set_segments(
    target: &mut Value,
    segments: &[String],
    full_path: &FieldPath,
    new_value: Value,
) -> Result<()> {
    let Some((head, rest)) = segments.split_first() else {
        *target = new_value;
        return Ok(());
    };

    if let Value::Array(items) = target {
        let index = head
            .parse::<usize>()
            .map_err(|_| Error::InvalidFieldPath(full_path.to_string()))?;
        let len = items.len();
        return match items.get_mut(index) {
            Some(item) => set_segments(item, rest, full_path, new_value),
            None => Err(Error::InvalidFieldPath(format!(
                "{} (index {} out of bounds for length {})",
                full_path, index, len
            ))),
        };
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    let map = target
        .as_object_mut()
        .ok_or_else(|| Error::InvalidFieldPath(full_path.to_string()))?;
    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_segments(child, rest, full_path, new_value)
}

/// Whether a value counts as "not filled in" for a form field.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Top-level keys whose values differ between two documents, sorted.
pub fn changed_fields(original: &Value, working: &Value) -> Vec<String> {
    match (original, working) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys = a
                .keys()
                .chain(b.keys())
                .filter(|k| a.get(*k) != b.get(*k))
                .cloned()
                .collect::<Vec<String>>();
            keys.sort();
            keys.dedup();
            keys
        }
        (a, b) if a != b => vec![String::new()],
        _ => Vec::new(),
    }
}

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Value of a single tag field
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Int(i64),
    Uint(u64),
    Str(String),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Int(v) => write!(f, "{}", v),
            TagValue::Uint(v) => write!(f, "{}", v),
            TagValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v as i64)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<u8> for TagValue {
    fn from(v: u8) -> Self {
        TagValue::Uint(v as u64)
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::Uint(v as u64)
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::Uint(v as u64)
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        TagValue::Uint(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(v)
    }
}

/// Grouping key of a document
///
/// Fields keep insertion order; two tags are equal only when they list the
/// same fields in the same order. Processors always build a given tag shape
/// the same way, so ordering never splits a bucket.
///
/// Serializes as a `name -> value` map in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tag {
    fields: Vec<(&'static str, TagValue)>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field append
    pub fn with(mut self, name: &'static str, value: impl Into<TagValue>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn push(&mut self, name: &'static str, value: impl Into<TagValue>) {
        self.fields.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> &[(&'static str, TagValue)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

use serde::ser::{Serialize, SerializeMap, Serializer};

/// How two values of the same field combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeRule {
    Sum,
    Max,
    Min,
}

impl MergeRule {
    #[inline]
    pub fn apply(self, left: u64, right: u64) -> u64 {
        match self {
            MergeRule::Sum => left.saturating_add(right),
            MergeRule::Max => left.max(right),
            MergeRule::Min => left.min(right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterField {
    pub name: &'static str,
    pub rule: MergeRule,
    pub value: u64,
}

/// Numeric payload of a document
///
/// Serializes as a `name -> value` map; merge rules stay internal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meter {
    fields: Vec<MeterField>,
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Meter {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn sum(self, name: &'static str, value: u64) -> Self {
        self.field(name, MergeRule::Sum, value)
    }

    pub fn max(self, name: &'static str, value: u64) -> Self {
        self.field(name, MergeRule::Max, value)
    }

    pub fn min(self, name: &'static str, value: u64) -> Self {
        self.field(name, MergeRule::Min, value)
    }

    pub fn field(mut self, name: &'static str, rule: MergeRule, value: u64) -> Self {
        self.fields.push(MeterField { name, rule, value });
        self
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
    }

    pub fn fields(&self) -> &[MeterField] {
        &self.fields
    }

    /// Fold `other` into `self` field by field
    ///
    /// Fields are matched by name, using the rule recorded on `self`.
    /// Fields only `other` carries are appended.
    pub fn merge(&mut self, other: &Meter) {
        for (i, theirs) in other.fields.iter().enumerate() {
            // Same processor, same shape: positions almost always line up
            let slot = match self.fields.get(i) {
                Some(ours) if ours.name == theirs.name => Some(i),
                _ => self.fields.iter().position(|f| f.name == theirs.name),
            };
            match slot {
                Some(j) => {
                    let ours = &mut self.fields[j];
                    ours.value = ours.rule.apply(ours.value, theirs.value);
                }
                None => self.fields.push(*theirs),
            }
        }
    }
}

impl Serialize for Meter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(field.name, &field.value)?;
        }
        map.end()
    }
}

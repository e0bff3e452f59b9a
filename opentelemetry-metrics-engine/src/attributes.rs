use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use opentelemetry::{Array, Key, KeyValue, Value};

/// A unique set of attributes that can be used as time series identifiers.
///
/// Keys are de-duplicated (the last value recorded for a key wins) and sorted,
/// so two sets built from the same entries in a different order are equal and
/// hash identically. Floating point values compare by their bit pattern, which
/// keeps the set usable as a `HashMap` key even when a value is `NaN`.
#[derive(Clone, Default, Debug)]
pub struct AttributeSet(Vec<KeyValue>, u64);

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        AttributeSet::new(values.to_vec())
    }
}

impl From<Vec<KeyValue>> for AttributeSet {
    fn from(values: Vec<KeyValue>) -> Self {
        AttributeSet::new(values)
    }
}

impl AttributeSet {
    fn new(mut values: Vec<KeyValue>) -> Self {
        // stable sort keeps recording order within a key, so the last one wins below
        values.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<KeyValue> = Vec::with_capacity(values.len());
        for kv in values {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        let hash = calculate_hash(&deduped);
        AttributeSet(deduped, hash)
    }

    /// Builds a set from the attributes accepted by `filter`.
    pub(crate) fn filtered<F>(values: &[KeyValue], filter: F) -> Self
    where
        F: Fn(&KeyValue) -> bool,
    {
        AttributeSet::new(values.iter().filter(|kv| filter(kv)).cloned().collect())
    }

    /// Returns the number of elements in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Retains only the attributes specified by the predicate.
    pub fn retain<F>(&mut self, f: F)
    where
        F: Fn(&KeyValue) -> bool,
    {
        self.0.retain(|kv| f(kv));

        // Recalculate the hash as elements are changed.
        self.1 = calculate_hash(&self.0);
    }

    /// Iterate over key value pairs in the set
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.iter().map(|kv| (&kv.key, &kv.value))
    }

    /// The sorted attributes of this set.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }

    pub(crate) fn into_vec(self) -> Vec<KeyValue> {
        self.0
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.1 == other.1
            && self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.key == b.key && value_eq(&a.value, &b.value))
    }
}

impl Eq for AttributeSet {}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.1)
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
        (Value::Array(Array::F64(a)), Value::Array(Array::F64(b))) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.to_bits() == b.to_bits())
        }
        _ => a == b,
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Bool(b) => {
            state.write_u8(0);
            b.hash(state);
        }
        Value::I64(i) => {
            state.write_u8(1);
            i.hash(state);
        }
        Value::F64(f) => {
            state.write_u8(2);
            f.to_bits().hash(state);
        }
        Value::String(s) => {
            state.write_u8(3);
            s.as_str().hash(state);
        }
        Value::Array(Array::F64(values)) => {
            state.write_u8(4);
            for f in values {
                f.to_bits().hash(state);
            }
        }
        other => {
            state.write_u8(5);
            other.to_string().hash(state);
        }
    }
}

fn calculate_hash(values: &[KeyValue]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for kv in values {
        kv.key.hash(&mut hasher);
        hash_value(&kv.value, &mut hasher);
    }
    hasher.finish()
}

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// An attribute value.
///
/// A closed tagged union covering the scalar and document types an item may
/// hold. Variant names follow the wire convention (`S` for string, `N` for
/// number, `B` for binary), so serialized items read like the service's JSON
/// shape: `{"S": "hello"}`, `{"N": 42.0}`, `{"L": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// String.
    S(String),
    /// Number. Stored as `f64`; ordered with `total_cmp` where used as a key.
    N(f64),
    /// Binary.
    B(Vec<u8>),
    /// Boolean.
    Bool(bool),
    /// Explicit null. Distinct from an absent attribute.
    Null,
    /// List of values.
    L(Vec<Value>),
    /// Map of attribute name to value.
    M(HashMap<String, Value>),
}

impl Value {
    /// Returns the string payload, if this is a string value.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Value::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric payload, if this is a number value.
    pub fn as_n(&self) -> Option<f64> {
        match self {
            Value::N(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the binary payload, if this is a binary value.
    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            Value::B(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Human-readable type tag, used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::S(_) => "S",
            Value::N(_) => "N",
            Value::B(_) => "B",
            Value::Bool(_) => "BOOL",
            Value::Null => "NULL",
            Value::L(_) => "L",
            Value::M(_) => "M",
        }
    }

    /// Narrows to the key-eligible scalar subset, if possible.
    pub fn as_key_value(&self) -> Option<KeyValue> {
        match self {
            Value::S(s) => Some(KeyValue::S(s.clone())),
            Value::N(n) => Some(KeyValue::N(*n)),
            Value::B(b) => Some(KeyValue::B(b.clone())),
            _ => None,
        }
    }

    /// Compares two values of the same scalar type. Returns `None` for
    /// mismatched or non-comparable types; filters treat that as no match.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::S(a), Value::S(b)) => Some(a.cmp(b)),
            (Value::N(a), Value::N(b)) => Some(a.total_cmp(b)),
            (Value::B(a), Value::B(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<KeyValue> for Value {
    fn from(kv: KeyValue) -> Self {
        match kv {
            KeyValue::S(s) => Value::S(s),
            KeyValue::N(n) => Value::N(n),
            KeyValue::B(b) => Value::B(b),
        }
    }
}

/// A key-eligible scalar: the subset of [`Value`] usable as a partition or
/// sort key.
///
/// Carries a total, type-aware order: strings lexicographic, numbers by
/// `f64::total_cmp`, binary byte-wise. Cross-type comparisons order by tag
/// (S < N < B) so the order stays total; a well-typed schema never produces
/// them within one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyValue {
    /// String key.
    S(String),
    /// Number key.
    N(f64),
    /// Binary key.
    B(Vec<u8>),
}

impl KeyValue {
    fn tag(&self) -> u8 {
        match self {
            KeyValue::S(_) => 0,
            KeyValue::N(_) => 1,
            KeyValue::B(_) => 2,
        }
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::S(a), KeyValue::S(b)) => a.cmp(b),
            (KeyValue::N(a), KeyValue::N(b)) => a.total_cmp(b),
            (KeyValue::B(a), KeyValue::B(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.tag());
        match self {
            KeyValue::S(s) => s.hash(state),
            // Bit-pattern hashing is consistent with total_cmp equality.
            KeyValue::N(n) => state.write_u64(n.to_bits()),
            KeyValue::B(b) => b.hash(state),
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::S(s) => write!(f, "{s}"),
            KeyValue::N(n) => write!(f, "{n}"),
            KeyValue::B(b) => write!(f, "{} bytes", b.len()),
        }
    }
}

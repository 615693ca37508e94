use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::value::Value;

/// An item: a mapping from attribute name to typed [`Value`].
///
/// Items are schemaless apart from the table's key attributes; two items in
/// the same table may carry entirely different attribute sets. Within a
/// table an item is uniquely identified by its (partition key, sort key)
/// values.
///
/// # Example
///
/// ```
/// use dynastore::Item;
///
/// let item = Item::new()
///     .set_string("UserId", "dongkyun")
///     .set_string("DeckId", "AWS")
///     .set_number("CardCount", 42.0);
/// ```
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub(crate) attributes: HashMap<String, Value>,
}

impl Item {
    /// Creates a new empty `Item`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a string attribute.
    pub fn set_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), Value::S(value.into()));
        self
    }

    /// Sets a number attribute.
    pub fn set_number(mut self, key: impl Into<String>, value: impl Into<f64>) -> Self {
        self.attributes.insert(key.into(), Value::N(value.into()));
        self
    }

    /// Sets a binary attribute.
    pub fn set_binary(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.attributes.insert(key.into(), Value::B(value.into()));
        self
    }

    /// Sets a boolean attribute.
    pub fn set_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.attributes.insert(key.into(), Value::Bool(value));
        self
    }

    /// Sets an explicit null attribute.
    pub fn set_null(mut self, key: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), Value::Null);
        self
    }

    /// Sets a list attribute.
    pub fn set_list(mut self, key: impl Into<String>, value: Vec<Value>) -> Self {
        self.attributes.insert(key.into(), Value::L(value));
        self
    }

    /// Sets a map attribute.
    pub fn set_map(mut self, key: impl Into<String>, value: HashMap<String, Value>) -> Self {
        self.attributes.insert(key.into(), Value::M(value));
        self
    }

    /// Sets an attribute to an arbitrary [`Value`].
    pub fn set_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Gets an attribute value by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Gets the value of an attribute as a string.
    ///
    /// Returns `None` if the attribute doesn't exist or is not a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_s)
    }

    /// Gets the value of an attribute as a number.
    ///
    /// Returns `None` if the attribute doesn't exist or is not a number.
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_n)
    }

    /// Whether the item carries the named attribute.
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Number of attributes on the item.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the item has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterates over attribute (name, value) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter()
    }

    /// Merges `updates` into this item, replacing existing attributes.
    /// Partial-update semantics: attributes absent from `updates` are kept.
    pub(crate) fn merge(&mut self, updates: &Item) {
        for (name, value) in &updates.attributes {
            self.attributes.insert(name.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Item {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::store::item::Item;
use crate::store::value::KeyValue;

/// Declared type of a key attribute. Only scalars can participate in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    /// String key attribute.
    String,
    /// Number key attribute.
    Number,
    /// Binary key attribute.
    Binary,
}

impl AttributeType {
    fn matches(&self, value: &KeyValue) -> bool {
        matches!(
            (self, value),
            (AttributeType::String, KeyValue::S(_))
                | (AttributeType::Number, KeyValue::N(_))
                | (AttributeType::Binary, KeyValue::B(_))
        )
    }
}

/// A named, typed key attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    name: String,
    attribute_type: AttributeType,
}

impl KeyAttribute {
    /// Creates a key attribute declaration.
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
        }
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared scalar type.
    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    /// Extracts this key attribute's value from an item.
    ///
    /// `Ok(None)` when the attribute is absent (sparse-index case);
    /// `Validation` when present but not of the declared type.
    pub(crate) fn extract(&self, item: &Item) -> Result<Option<KeyValue>> {
        let Some(value) = item.get(&self.name) else {
            return Ok(None);
        };
        let kv = value.as_key_value().filter(|kv| self.attribute_type.matches(kv));
        match kv {
            Some(kv) => Ok(Some(kv)),
            None => Err(Error::Validation(format!(
                "attribute '{}' has type {} but the key schema declares {:?}",
                self.name,
                value.type_name(),
                self.attribute_type
            ))),
        }
    }
}

/// A primary key schema: a partition key and an optional sort key.
///
/// Used both for tables and for global secondary indexes; "no sort key" is an
/// `Option`, not a special-cased type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    partition: KeyAttribute,
    sort: Option<KeyAttribute>,
}

impl KeySchema {
    /// Creates a key schema.
    pub fn new(partition: KeyAttribute, sort: Option<KeyAttribute>) -> Self {
        Self { partition, sort }
    }

    /// The partition key attribute.
    pub fn partition(&self) -> &KeyAttribute {
        &self.partition
    }

    /// The sort key attribute, if the schema has one.
    pub fn sort(&self) -> Option<&KeyAttribute> {
        self.sort.as_ref()
    }

    /// Extracts the full key from an item, requiring every declared
    /// attribute to be present and well typed.
    pub(crate) fn extract_required(&self, item: &Item) -> Result<(KeyValue, Option<KeyValue>)> {
        let partition = self.partition.extract(item)?.ok_or_else(|| {
            Error::Validation(format!(
                "missing required key attribute '{}'",
                self.partition.name
            ))
        })?;
        let sort = match &self.sort {
            Some(attr) => Some(attr.extract(item)?.ok_or_else(|| {
                Error::Validation(format!("missing required key attribute '{}'", attr.name))
            })?),
            None => None,
        };
        Ok((partition, sort))
    }

    /// Extracts the full key, sparse-index style: `Ok(None)` when any
    /// declared attribute is absent, `Validation` when one is mistyped.
    pub(crate) fn extract_sparse(&self, item: &Item) -> Result<Option<(KeyValue, Option<KeyValue>)>> {
        let Some(partition) = self.partition.extract(item)? else {
            return Ok(None);
        };
        let sort = match &self.sort {
            Some(attr) => match attr.extract(item)? {
                Some(kv) => Some(kv),
                None => return Ok(None),
            },
            None => None,
        };
        Ok(Some((partition, sort)))
    }

    /// Names of the declared key attributes.
    pub(crate) fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition.name())
            .chain(self.sort.as_ref().map(|a| a.name()))
    }
}

/// Which non-key attributes an index copies into its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Copy every attribute of the item.
    All,
    /// Copy only the table's and the index's key attributes.
    KeysOnly,
    /// Copy the key attributes plus an explicit allowlist.
    Include(BTreeSet<String>),
}

impl Projection {
    /// Builds an `Include` projection from an attribute name list.
    pub fn include<I, S>(attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include(attrs.into_iter().map(Into::into).collect())
    }
}

/// A local secondary index: same partition key as the table, alternate sort
/// key. Declared at table creation and maintained synchronously with every
/// write. The shared partition key is structural — an `LsiSpec` has no
/// partition attribute of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsiSpec {
    name: String,
    sort_key: KeyAttribute,
    projection: Projection,
}

impl LsiSpec {
    /// Creates a local index spec with the default `All` projection.
    pub fn new(name: impl Into<String>, sort_key: KeyAttribute) -> Self {
        Self {
            name: name.into(),
            sort_key,
            projection: Projection::All,
        }
    }

    /// Replaces the projection policy.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The alternate sort key attribute.
    pub fn sort_key(&self) -> &KeyAttribute {
        &self.sort_key
    }

    /// The projection policy.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }
}

/// A global secondary index: independently chosen partition and sort keys,
/// maintained asynchronously (eventually consistent) behind a change queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsiSpec {
    name: String,
    key_schema: KeySchema,
    projection: Projection,
}

impl GsiSpec {
    /// Creates a global index spec with the default `All` projection.
    pub fn new(name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            name: name.into(),
            key_schema,
            projection: Projection::All,
        }
    }

    /// Replaces the projection policy.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The index key schema.
    pub fn key_schema(&self) -> &KeySchema {
        &self.key_schema
    }

    /// The projection policy.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }
}

/// Lifecycle state of a global secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    /// Backfill of existing items is in progress; queries are rejected.
    Creating,
    /// Backfill complete and the update queue drained at least once.
    Active,
    /// Being removed; queries are rejected.
    Deleting,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexState::Creating => "CREATING",
            IndexState::Active => "ACTIVE",
            IndexState::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// Table configuration: name, primary key schema, and the local secondary
/// indexes, which must be declared up front.
///
/// # Example
///
/// ```
/// use dynastore::{AttributeType, KeyAttribute, KeySchema, LsiSpec, TableSpec};
///
/// let spec = TableSpec::new(
///     "deck",
///     KeySchema::new(
///         KeyAttribute::new("UserId", AttributeType::String),
///         Some(KeyAttribute::new("DeckId", AttributeType::String)),
///     ),
/// )
/// .with_local_index(LsiSpec::new(
///     "LastUpdated-index",
///     KeyAttribute::new("LastUpdatedDateTime", AttributeType::Number),
/// ));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    name: String,
    key_schema: KeySchema,
    local_indexes: Vec<LsiSpec>,
}

impl TableSpec {
    /// Creates a table spec with no local indexes.
    pub fn new(name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            name: name.into(),
            key_schema,
            local_indexes: Vec::new(),
        }
    }

    /// Adds a local secondary index declaration.
    pub fn with_local_index(mut self, spec: LsiSpec) -> Self {
        self.local_indexes.push(spec);
        self
    }

    /// The table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The primary key schema.
    pub fn key_schema(&self) -> &KeySchema {
        &self.key_schema
    }

    /// The declared local secondary indexes.
    pub fn local_indexes(&self) -> &[LsiSpec] {
        &self.local_indexes
    }

    /// Structural checks run at table creation, before anything registers.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("table name must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        for lsi in &self.local_indexes {
            if lsi.name().is_empty() {
                return Err(Error::Validation("index name must not be empty".into()));
            }
            if !seen.insert(lsi.name()) {
                return Err(Error::IndexAlreadyExists(lsi.name().to_string()));
            }
            if lsi.sort_key().name() == self.key_schema.partition().name() {
                return Err(Error::Validation(format!(
                    "local index '{}' sort key collides with the table partition key",
                    lsi.name()
                )));
            }
        }
        Ok(())
    }
}

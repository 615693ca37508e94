//! Query and scan evaluation.
//!
//! A query names a target (the base table or a secondary index), an equality
//! condition on the partition key, and an optional range condition on the
//! sort key; results come back ordered by sort key, optionally reversed,
//! truncated at `limit` with a continuation key. A scan walks the whole
//! target in key order and applies an optional post-read filter, so the
//! number of items examined can exceed the number returned.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::store::index::PrimaryKey;
use crate::store::item::Item;
use crate::store::schema::{AttributeType, KeyAttribute, KeySchema};
use crate::store::value::{KeyValue, Value};

/// Range condition on the sort key of a query target.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    /// Sort key equals the value.
    Eq(Value),
    /// Sort key strictly less than the value.
    Lt(Value),
    /// Sort key less than or equal to the value.
    Le(Value),
    /// Sort key strictly greater than the value.
    Gt(Value),
    /// Sort key greater than or equal to the value.
    Ge(Value),
    /// Sort key within the inclusive range `[low, high]`.
    Between(Value, Value),
    /// Sort key starts with the prefix. String sort keys only.
    BeginsWith(String),
}

/// A query against a table or one of its secondary indexes.
///
/// # Example
///
/// ```
/// use dynastore::{QueryRequest, SortKeyCondition, Value};
///
/// let request = QueryRequest::new(Value::S("dongkyun".into()))
///     .with_index("LastUpdated-index")
///     .scan_forward(false)
///     .with_limit(10);
/// ```
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub(crate) index_name: Option<String>,
    pub(crate) partition_value: Value,
    pub(crate) sort_condition: Option<SortKeyCondition>,
    pub(crate) scan_forward: bool,
    pub(crate) limit: Option<usize>,
    pub(crate) exclusive_start_key: Option<Item>,
}

impl QueryRequest {
    /// Creates a query with an equality condition on the partition key.
    /// The partition key condition is always equality; other shapes are not
    /// representable.
    pub fn new(partition_value: Value) -> Self {
        Self {
            index_name: None,
            partition_value,
            sort_condition: None,
            scan_forward: true,
            limit: None,
            exclusive_start_key: None,
        }
    }

    /// Targets a named secondary index instead of the base table.
    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Adds a sort key condition.
    pub fn with_sort_condition(mut self, condition: SortKeyCondition) -> Self {
        self.sort_condition = Some(condition);
        self
    }

    /// Sets the traversal direction. `true` (the default) is ascending.
    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    /// Truncates the result at `limit` items.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resumes after the position named by a previous response's
    /// `last_evaluated_key`.
    pub fn with_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }
}

/// Post-read filter condition applied by scans.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    /// Attribute equals the value.
    Eq(Value),
    /// Attribute differs from the value (absent attributes match).
    Ne(Value),
    /// Attribute is less than the value.
    Lt(Value),
    /// Attribute is less than or equal to the value.
    Le(Value),
    /// Attribute is greater than the value.
    Gt(Value),
    /// Attribute is greater than or equal to the value.
    Ge(Value),
    /// Attribute is present, whatever its value.
    Exists,
    /// Attribute is absent.
    NotExists,
}

/// A named-attribute filter for scans. Filtering happens after the item is
/// read, never through an index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFilter {
    attribute: String,
    condition: FilterCondition,
}

impl ScanFilter {
    /// Creates a filter on the named attribute.
    pub fn new(attribute: impl Into<String>, condition: FilterCondition) -> Self {
        Self {
            attribute: attribute.into(),
            condition,
        }
    }

    pub(crate) fn matches(&self, item: &Item) -> bool {
        let value = item.get(&self.attribute);
        match (&self.condition, value) {
            (FilterCondition::Exists, v) => v.is_some(),
            (FilterCondition::NotExists, v) => v.is_none(),
            (FilterCondition::Eq(want), Some(v)) => v == want,
            (FilterCondition::Ne(want), Some(v)) => v != want,
            (FilterCondition::Ne(_), None) => true,
            (FilterCondition::Lt(want), Some(v)) => v.compare(want) == Some(Ordering::Less),
            (FilterCondition::Le(want), Some(v)) => {
                matches!(v.compare(want), Some(Ordering::Less | Ordering::Equal))
            }
            (FilterCondition::Gt(want), Some(v)) => v.compare(want) == Some(Ordering::Greater),
            (FilterCondition::Ge(want), Some(v)) => {
                matches!(v.compare(want), Some(Ordering::Greater | Ordering::Equal))
            }
            (_, None) => false,
        }
    }
}

/// A scan of a whole table or index.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub(crate) index_name: Option<String>,
    pub(crate) filter: Option<ScanFilter>,
    pub(crate) limit: Option<usize>,
    pub(crate) exclusive_start_key: Option<Item>,
}

impl ScanRequest {
    /// Creates an unfiltered scan of the base table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets a named secondary index instead of the base table.
    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Adds a post-read filter.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Bounds the number of items *examined* per page. Filtering happens
    /// after the read, so fewer items may be returned.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resumes after the position named by a previous response's
    /// `last_evaluated_key`.
    pub fn with_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }
}

/// Result page of a query or scan.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    /// Matching items (or projected index entries), in traversal order.
    pub items: Vec<Item>,
    /// Number of items returned.
    pub count: usize,
    /// Number of items examined before filtering. Equals `count` for
    /// queries; may exceed it for filtered scans.
    pub scanned_count: usize,
    /// Continuation key to pass as `exclusive_start_key` for the next page,
    /// when more results exist.
    pub last_evaluated_key: Option<Item>,
}

/// One candidate row during evaluation: its position in the target ordering
/// plus the stored (or projected) attributes and the back-reference.
pub(crate) struct Row<'a> {
    pub(crate) partition: &'a KeyValue,
    pub(crate) sort: Option<&'a KeyValue>,
    pub(crate) item: &'a Item,
    pub(crate) primary: &'a PrimaryKey,
}

/// Key-schema context of the evaluation target, used to type-check
/// conditions and to build and parse continuation keys.
pub(crate) struct TargetInfo<'a> {
    pub(crate) table_key: &'a KeySchema,
    /// The index's own partition attribute when the target is an index.
    pub(crate) index_partition: Option<&'a KeyAttribute>,
    /// The index's own sort attribute when the target is an index.
    pub(crate) index_sort: Option<&'a KeyAttribute>,
}

impl<'a> TargetInfo<'a> {
    pub(crate) fn base(table_key: &'a KeySchema) -> Self {
        Self {
            table_key,
            index_partition: None,
            index_sort: None,
        }
    }

    pub(crate) fn index(
        table_key: &'a KeySchema,
        partition: &'a KeyAttribute,
        sort: Option<&'a KeyAttribute>,
    ) -> Self {
        Self {
            table_key,
            index_partition: Some(partition),
            index_sort: sort,
        }
    }

    /// The attribute queries order by: the index sort key for index targets,
    /// the table sort key otherwise.
    fn effective_sort(&self) -> Option<&KeyAttribute> {
        if self.index_partition.is_some() {
            self.index_sort
        } else {
            self.table_key.sort()
        }
    }

    /// The attribute partition equality resolves against.
    pub(crate) fn effective_partition(&self) -> &KeyAttribute {
        self.index_partition.unwrap_or(self.table_key.partition())
    }

    /// Builds a continuation key naming the target's position attributes
    /// plus the base primary key.
    fn build_token(&self, row: &Row<'_>) -> Item {
        let mut token = Item::new().set_value(
            self.table_key.partition().name(),
            row.primary.partition().clone().into(),
        );
        if let (Some(attr), Some(sort)) = (self.table_key.sort(), row.primary.sort()) {
            token = token.set_value(attr.name(), sort.clone().into());
        }
        if let Some(attr) = self.index_partition {
            token = token.set_value(attr.name(), row.partition.clone().into());
        }
        if let (Some(attr), Some(sort)) = (self.index_sort, row.sort) {
            token = token.set_value(attr.name(), sort.clone().into());
        }
        token
    }

    fn parse_token(&self, token: &Item) -> Result<StartPos> {
        let (partition, sort) = self.table_key.extract_required(token)?;
        let primary = PrimaryKey::new(partition, sort);
        let (pos_partition, pos_sort) = match self.index_partition {
            Some(attr) => {
                let partition = attr.extract(token)?.ok_or_else(|| {
                    Error::Validation(format!(
                        "continuation key is missing index attribute '{}'",
                        attr.name()
                    ))
                })?;
                let sort = match self.index_sort {
                    Some(attr) => Some(attr.extract(token)?.ok_or_else(|| {
                        Error::Validation(format!(
                            "continuation key is missing index attribute '{}'",
                            attr.name()
                        ))
                    })?),
                    None => None,
                };
                (partition, sort)
            }
            None => (primary.partition().clone(), primary.sort().cloned()),
        };
        Ok(StartPos {
            primary,
            partition: pos_partition,
            sort: pos_sort,
        })
    }
}

/// Parsed continuation position.
struct StartPos {
    primary: PrimaryKey,
    partition: KeyValue,
    sort: Option<KeyValue>,
}

/// Resolves and type-checks the partition key equality value.
pub(crate) fn resolve_partition_value(value: &Value, attr: &KeyAttribute) -> Result<KeyValue> {
    typed_key_value(value, attr)
}

fn typed_key_value(value: &Value, attr: &KeyAttribute) -> Result<KeyValue> {
    let kv = value.as_key_value().ok_or_else(|| {
        Error::Validation(format!(
            "condition value for '{}' has non-key type {}",
            attr.name(),
            value.type_name()
        ))
    })?;
    let matches = matches!(
        (attr.attribute_type(), &kv),
        (AttributeType::String, KeyValue::S(_))
            | (AttributeType::Number, KeyValue::N(_))
            | (AttributeType::Binary, KeyValue::B(_))
    );
    if !matches {
        return Err(Error::Validation(format!(
            "condition value type {} does not match key attribute '{}' ({:?})",
            value.type_name(),
            attr.name(),
            attr.attribute_type()
        )));
    }
    Ok(kv)
}

enum ResolvedCondition {
    Eq(KeyValue),
    Lt(KeyValue),
    Le(KeyValue),
    Gt(KeyValue),
    Ge(KeyValue),
    Between(KeyValue, KeyValue),
    BeginsWith(String),
}

impl ResolvedCondition {
    fn matches(&self, sort: Option<&KeyValue>) -> bool {
        let Some(sort) = sort else {
            return false;
        };
        match self {
            ResolvedCondition::Eq(v) => sort == v,
            ResolvedCondition::Lt(v) => sort < v,
            ResolvedCondition::Le(v) => sort <= v,
            ResolvedCondition::Gt(v) => sort > v,
            ResolvedCondition::Ge(v) => sort >= v,
            ResolvedCondition::Between(low, high) => low <= sort && sort <= high,
            ResolvedCondition::BeginsWith(prefix) => match sort {
                KeyValue::S(s) => s.starts_with(prefix),
                _ => false,
            },
        }
    }
}

fn resolve_sort_condition(
    condition: &SortKeyCondition,
    sort_attr: Option<&KeyAttribute>,
) -> Result<ResolvedCondition> {
    let attr = sort_attr.ok_or_else(|| {
        Error::Validation("sort key condition on a target without a sort key".into())
    })?;
    Ok(match condition {
        SortKeyCondition::Eq(v) => ResolvedCondition::Eq(typed_key_value(v, attr)?),
        SortKeyCondition::Lt(v) => ResolvedCondition::Lt(typed_key_value(v, attr)?),
        SortKeyCondition::Le(v) => ResolvedCondition::Le(typed_key_value(v, attr)?),
        SortKeyCondition::Gt(v) => ResolvedCondition::Gt(typed_key_value(v, attr)?),
        SortKeyCondition::Ge(v) => ResolvedCondition::Ge(typed_key_value(v, attr)?),
        SortKeyCondition::Between(low, high) => ResolvedCondition::Between(
            typed_key_value(low, attr)?,
            typed_key_value(high, attr)?,
        ),
        SortKeyCondition::BeginsWith(prefix) => {
            if attr.attribute_type() != AttributeType::String {
                return Err(Error::Validation(format!(
                    "begins_with requires a string sort key, but '{}' is {:?}",
                    attr.name(),
                    attr.attribute_type()
                )));
            }
            ResolvedCondition::BeginsWith(prefix.clone())
        }
    })
}

fn check_limit(limit: Option<usize>) -> Result<()> {
    if limit == Some(0) {
        return Err(Error::Validation("limit must be positive".into()));
    }
    Ok(())
}

/// Position of the first row strictly past the continuation position, in
/// traversal order. Prefers the exact back-referenced row; if that item was
/// deleted between pages, falls back to the first row past the token's sort
/// value.
fn resume_index(rows: &[Row<'_>], start: &StartPos, forward: bool) -> usize {
    if let Some(i) = rows.iter().position(|r| *r.primary == start.primary) {
        return i + 1;
    }
    rows.iter()
        .position(|r| {
            let by_partition = r.partition.cmp(&start.partition);
            let ordering = by_partition.then_with(|| {
                match (r.sort, &start.sort) {
                    (Some(a), Some(b)) => a.cmp(b),
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                }
            });
            if forward {
                ordering == Ordering::Greater
            } else {
                ordering == Ordering::Less
            }
        })
        .unwrap_or(rows.len())
}

/// Evaluates a query over the partition run `rows` (given in ascending
/// order).
pub(crate) fn run_query(
    rows: Vec<Row<'_>>,
    target: &TargetInfo<'_>,
    sort_condition: Option<&SortKeyCondition>,
    scan_forward: bool,
    limit: Option<usize>,
    start_key: Option<&Item>,
) -> Result<QueryOutput> {
    check_limit(limit)?;
    let condition = sort_condition
        .map(|c| resolve_sort_condition(c, target.effective_sort()))
        .transpose()?;

    let mut matched: Vec<Row<'_>> = rows
        .into_iter()
        .filter(|row| condition.as_ref().map_or(true, |c| c.matches(row.sort)))
        .collect();
    if !scan_forward {
        matched.reverse();
    }

    let skip = match start_key {
        Some(token) => {
            let start = target.parse_token(token)?;
            resume_index(&matched, &start, scan_forward)
        }
        None => 0,
    };

    let remaining = &matched[skip.min(matched.len())..];
    let take = limit.unwrap_or(remaining.len()).min(remaining.len());
    let page = &remaining[..take];
    let items: Vec<Item> = page.iter().map(|row| row.item.clone()).collect();
    let last_evaluated_key = if take < remaining.len() {
        page.last().map(|row| target.build_token(row))
    } else {
        None
    };

    let count = items.len();
    Ok(QueryOutput {
        items,
        count,
        scanned_count: count,
        last_evaluated_key,
    })
}

/// Evaluates a scan over the full target `rows` (ascending order). `limit`
/// bounds items examined; the filter runs after the read.
pub(crate) fn run_scan(
    rows: Vec<Row<'_>>,
    target: &TargetInfo<'_>,
    filter: Option<&ScanFilter>,
    limit: Option<usize>,
    start_key: Option<&Item>,
) -> Result<QueryOutput> {
    check_limit(limit)?;

    let skip = match start_key {
        Some(token) => {
            let start = target.parse_token(token)?;
            resume_index(&rows, &start, true)
        }
        None => 0,
    };

    let remaining = &rows[skip.min(rows.len())..];
    let examine = limit.unwrap_or(remaining.len()).min(remaining.len());
    let examined = &remaining[..examine];

    let items: Vec<Item> = examined
        .iter()
        .filter(|row| filter.map_or(true, |f| f.matches(row.item)))
        .map(|row| row.item.clone())
        .collect();
    let last_evaluated_key = if examine < remaining.len() {
        examined.last().map(|row| target.build_token(row))
    } else {
        None
    };

    Ok(QueryOutput {
        count: items.len(),
        scanned_count: examined.len(),
        items,
        last_evaluated_key,
    })
}

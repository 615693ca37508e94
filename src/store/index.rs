//! Ordered index structure shared by the primary index, local secondary
//! indexes, and global secondary indexes.
//!
//! An index is derived state: entries exist only as projections of live
//! items. Each entry keeps a back-reference to the item's full primary key
//! so queries can report it and updates can find the entry to move or
//! remove.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use crate::store::item::Item;
use crate::store::schema::Projection;
use crate::store::value::KeyValue;

/// Fully-resolved primary key of an item: partition key value plus optional
/// sort key value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub(crate) partition: KeyValue,
    pub(crate) sort: Option<KeyValue>,
}

impl PrimaryKey {
    pub(crate) fn new(partition: KeyValue, sort: Option<KeyValue>) -> Self {
        Self { partition, sort }
    }

    /// The partition key value.
    pub fn partition(&self) -> &KeyValue {
        &self.partition
    }

    /// The sort key value, if the table has a sort key.
    pub fn sort(&self) -> Option<&KeyValue> {
        self.sort.as_ref()
    }
}

/// Ordering key of an index entry.
///
/// The trailing sequence number breaks ties between entries sharing an
/// index (partition, sort) pair: such duplicates are legal in secondary
/// indexes (an alternate sort key need not be unique within a partition)
/// and keep stable FIFO insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntryKey {
    pub(crate) partition: KeyValue,
    pub(crate) sort: Option<KeyValue>,
    pub(crate) seq: u64,
}

/// One index entry: the projected attributes plus the back-reference to the
/// owning item's primary key.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) attributes: Item,
    pub(crate) primary: PrimaryKey,
}

/// An ordered map of index entries with a primary-key back-map.
///
/// The back-map makes entry maintenance O(log n) on item updates and lets
/// pagination resume from a continuation token that names only key
/// attributes.
#[derive(Debug, Default)]
pub(crate) struct IndexMap {
    entries: BTreeMap<EntryKey, IndexEntry>,
    by_primary: HashMap<PrimaryKey, EntryKey>,
    next_seq: u64,
}

impl IndexMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts or repositions the entry for `primary`.
    ///
    /// An update that keeps the same index key keeps its sequence number and
    /// therefore its position among duplicates; a key-changing update is
    /// removed and re-appended at the tail of the new key's run.
    pub(crate) fn upsert(
        &mut self,
        primary: PrimaryKey,
        partition: KeyValue,
        sort: Option<KeyValue>,
        attributes: Item,
    ) {
        let seq = match self.by_primary.get(&primary).cloned() {
            Some(old) if old.partition == partition && old.sort == sort => old.seq,
            Some(old) => {
                self.entries.remove(&old);
                self.take_seq()
            }
            None => self.take_seq(),
        };
        let key = EntryKey {
            partition,
            sort,
            seq,
        };
        self.by_primary.insert(primary.clone(), key.clone());
        self.entries.insert(key, IndexEntry {
            attributes,
            primary,
        });
    }

    /// Removes the entry for `primary`, if any.
    pub(crate) fn remove(&mut self, primary: &PrimaryKey) {
        if let Some(key) = self.by_primary.remove(primary) {
            self.entries.remove(&key);
        }
    }

    /// Current position of an item within this index, if indexed.
    pub(crate) fn position_of(&self, primary: &PrimaryKey) -> Option<&EntryKey> {
        self.by_primary.get(primary)
    }

    /// Entries of one partition, in (sort key, FIFO) order.
    pub(crate) fn partition_entries(
        &self,
        partition: &KeyValue,
    ) -> impl DoubleEndedIterator<Item = (&EntryKey, &IndexEntry)> {
        let lower = EntryKey {
            partition: partition.clone(),
            sort: None,
            seq: 0,
        };
        self.entries
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while({
                let partition = partition.clone();
                move |(key, _)| key.partition == partition
            })
            // Materialized so the reverse direction works; partitions are
            // expected to be small relative to the table.
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// All entries in index order.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = (&EntryKey, &IndexEntry)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Applies a projection policy.
///
/// `key_attrs` is the union of the table's and the index's key attribute
/// names; those are copied under every policy so each entry can stand alone
/// and carry its back-reference attributes.
pub(crate) fn project(item: &Item, projection: &Projection, key_attrs: &BTreeSet<String>) -> Item {
    match projection {
        Projection::All => item.clone(),
        Projection::KeysOnly => item
            .iter()
            .filter(|(name, _)| key_attrs.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        Projection::Include(extra) => item
            .iter()
            .filter(|(name, _)| key_attrs.contains(name.as_str()) || extra.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(p: &str, s: &str) -> PrimaryKey {
        PrimaryKey::new(KeyValue::S(p.into()), Some(KeyValue::S(s.into())))
    }

    #[test]
    fn duplicate_sort_keys_keep_fifo_order() {
        let mut map = IndexMap::new();
        let attrs = Item::new();
        map.upsert(
            pk("u", "b"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(5.0)),
            attrs.clone(),
        );
        map.upsert(
            pk("u", "a"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(5.0)),
            attrs,
        );

        let order: Vec<_> = map
            .partition_entries(&KeyValue::S("u".into()))
            .map(|(_, e)| e.primary.clone())
            .collect();
        assert_eq!(order, vec![pk("u", "b"), pk("u", "a")]);
    }

    #[test]
    fn same_key_update_is_stable() {
        let mut map = IndexMap::new();
        map.upsert(
            pk("u", "first"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(1.0)),
            Item::new(),
        );
        map.upsert(
            pk("u", "second"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(1.0)),
            Item::new(),
        );
        // Rewriting "first" with the same index key must not move it behind
        // "second".
        map.upsert(
            pk("u", "first"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(1.0)),
            Item::new().set_bool("updated", true),
        );

        let order: Vec<_> = map
            .partition_entries(&KeyValue::S("u".into()))
            .map(|(_, e)| e.primary.clone())
            .collect();
        assert_eq!(order, vec![pk("u", "first"), pk("u", "second")]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn key_change_moves_entry() {
        let mut map = IndexMap::new();
        map.upsert(
            pk("u", "x"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(1.0)),
            Item::new(),
        );
        map.upsert(
            pk("u", "x"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(9.0)),
            Item::new(),
        );

        let sorts: Vec<_> = map
            .partition_entries(&KeyValue::S("u".into()))
            .map(|(k, _)| k.sort.clone())
            .collect();
        assert_eq!(sorts, vec![Some(KeyValue::N(9.0))]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_clears_both_maps() {
        let mut map = IndexMap::new();
        map.upsert(
            pk("u", "x"),
            KeyValue::S("u".into()),
            Some(KeyValue::N(1.0)),
            Item::new(),
        );
        map.remove(&pk("u", "x"));
        assert_eq!(map.len(), 0);
        assert!(map.position_of(&pk("u", "x")).is_none());
        // Idempotent.
        map.remove(&pk("u", "x"));
    }

    #[test]
    fn projection_policies() {
        let item = Item::new()
            .set_string("Date", "2017-07-20")
            .set_number("ResponseCode", 302.0)
            .set_string("Hour", "20")
            .set_string("Path", "/x")
            .set_string("RequestId", "R1");
        let keys: BTreeSet<String> = ["RequestId", "Date", "ResponseCode"]
            .into_iter()
            .map(String::from)
            .collect();

        let all = project(&item, &Projection::All, &keys);
        assert_eq!(all.len(), 5);

        let keys_only = project(&item, &Projection::KeysOnly, &keys);
        assert_eq!(keys_only.len(), 3);
        assert!(!keys_only.contains("Hour"));

        let include = project(&item, &Projection::include(["Hour"]), &keys);
        assert_eq!(include.len(), 4);
        assert!(include.contains("Hour"));
        assert!(!include.contains("Path"));
    }
}

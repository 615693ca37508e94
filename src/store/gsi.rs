//! Global secondary index maintenance.
//!
//! GSIs are eventually consistent: a base write commits and returns before
//! its GSI entries reflect it. Every write appends a [`ChangeRecord`] (old
//! state + new state) to each GSI's queue in commit order; a consumer task
//! applies the records, recomputing the entry as an upsert or a removal
//! depending on whether the index key attributes are present after the
//! change. The queue is explicit message passing so ordering and draining
//! stay observable: a `Flush` barrier answers once everything enqueued
//! before it has been applied.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};

use crate::error::Result;
use crate::store::index::{project, IndexMap, PrimaryKey};
use crate::store::item::Item;
use crate::store::schema::{GsiSpec, IndexState, KeySchema};

/// Old and new state of one item, captured atomically with the base write.
#[derive(Debug, Clone)]
pub(crate) struct ChangeRecord {
    pub(crate) before: Option<Item>,
    pub(crate) after: Option<Item>,
}

pub(crate) enum GsiEvent {
    Change(ChangeRecord),
    /// Barrier: acknowledged once every earlier event has been applied and
    /// the index is active.
    Flush(oneshot::Sender<()>),
}

/// Shared state of one GSI: spec, lifecycle state, and the entry map. The
/// consumer task holds this without holding the queue sender, so dropping
/// the [`GsiHandle`] closes the queue and ends the task.
pub(crate) struct GsiData {
    spec: GsiSpec,
    table_key: KeySchema,
    key_attrs: BTreeSet<String>,
    state: RwLock<IndexState>,
    pub(crate) entries: RwLock<IndexMap>,
}

impl GsiData {
    pub(crate) fn new(spec: GsiSpec, table_key: KeySchema) -> Self {
        let key_attrs = table_key
            .attribute_names()
            .chain(spec.key_schema().attribute_names())
            .map(String::from)
            .collect();
        Self {
            spec,
            table_key,
            key_attrs,
            state: RwLock::new(IndexState::Creating),
            entries: RwLock::new(IndexMap::new()),
        }
    }

    pub(crate) fn spec(&self) -> &GsiSpec {
        &self.spec
    }

    pub(crate) async fn state(&self) -> IndexState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: IndexState) {
        *self.state.write().await = state;
    }

    /// Applies one change record to the entry map.
    ///
    /// The item is indexed iff every index key attribute is present after
    /// the change (sparse semantics); otherwise any existing entry is
    /// removed. Key attribute typing was validated on the write path.
    fn apply(&self, entries: &mut IndexMap, change: &ChangeRecord) {
        let Some(source) = change.after.as_ref().or(change.before.as_ref()) else {
            return;
        };
        let Ok((partition, sort)) = self.table_key.extract_required(source) else {
            return;
        };
        let primary = PrimaryKey::new(partition, sort);

        match &change.after {
            Some(item) => match self.spec.key_schema().extract_sparse(item) {
                Ok(Some((index_partition, index_sort))) => entries.upsert(
                    primary,
                    index_partition,
                    index_sort,
                    project(item, self.spec.projection(), &self.key_attrs),
                ),
                _ => entries.remove(&primary),
            },
            None => entries.remove(&primary),
        }
    }
}

/// Write-side handle to a GSI: the shared data plus the queue sender.
pub(crate) struct GsiHandle {
    pub(crate) data: Arc<GsiData>,
    tx: UnboundedSender<GsiEvent>,
}

impl GsiHandle {
    pub(crate) fn new(data: Arc<GsiData>, tx: UnboundedSender<GsiEvent>) -> Self {
        Self { data, tx }
    }

    /// Appends a change record. Called in commit order under the table's
    /// write lock, which is what preserves per-key ordering downstream.
    pub(crate) fn enqueue(&self, change: ChangeRecord) {
        let _ = self.tx.send(GsiEvent::Change(change));
    }

    /// Sends a flush barrier, returning the acknowledgement channel.
    pub(crate) fn flush(&self) -> oneshot::Receiver<()> {
        let (ack, rx) = oneshot::channel();
        let _ = self.tx.send(GsiEvent::Flush(ack));
        rx
    }

    /// Pre-write typing check for this index's key attributes, so a write
    /// never enqueues a record the consumer would have to reject.
    pub(crate) fn validate_item(&self, item: &Item) -> Result<()> {
        self.data.spec.key_schema().extract_sparse(item).map(|_| ())
    }
}

/// The consumer loop: backfill the registration-time snapshot, drain what
/// queued up meanwhile, mark the index active, then apply changes until the
/// queue closes.
pub(crate) async fn run_consumer(
    data: Arc<GsiData>,
    snapshot: Vec<Item>,
    mut rx: UnboundedReceiver<GsiEvent>,
) {
    let name = data.spec.name().to_string();
    {
        let mut entries = data.entries.write().await;
        for item in &snapshot {
            data.apply(
                &mut entries,
                &ChangeRecord {
                    before: None,
                    after: Some(item.clone()),
                },
            );
        }
        info!(
            index = %name,
            scanned = snapshot.len(),
            indexed = entries.len(),
            "backfill complete"
        );
    }

    // Drain events that queued during backfill. Flush acknowledgements are
    // held back until the index is active, so a flush issued while the index
    // was still creating observes the activation.
    let mut pending_acks = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(GsiEvent::Change(change)) => {
                let mut entries = data.entries.write().await;
                data.apply(&mut entries, &change);
            }
            Ok(GsiEvent::Flush(ack)) => pending_acks.push(ack),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                for ack in pending_acks {
                    let _ = ack.send(());
                }
                return;
            }
        }
    }

    data.set_state(IndexState::Active).await;
    info!(index = %name, "index active");
    for ack in pending_acks {
        let _ = ack.send(());
    }

    while let Some(event) = rx.recv().await {
        match event {
            GsiEvent::Change(change) => {
                let mut entries = data.entries.write().await;
                data.apply(&mut entries, &change);
            }
            GsiEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!(index = %name, "consumer stopped");
}

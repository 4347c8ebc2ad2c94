//! In-memory document store.
//!
//! Live queries are fanned out over unbounded channels while the state lock
//! is held, so every subscriber sees changes in the order they were applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::{
    ChangeBatch, ChangeKind, Document, DocumentChange, DocumentRef, DocumentStore, Fields, Filter,
    Subscription,
};
use crate::error::StoreError;

struct StoredDocument {
    seq: u64,
    fields: Fields,
}

struct Listener {
    collection: String,
    filter: Filter,
    tx: mpsc::UnboundedSender<Result<ChangeBatch, StoreError>>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, HashMap<String, StoredDocument>>,
    listeners: HashMap<u64, Listener>,
    next_seq: u64,
    next_listener: u64,
}

impl State {
    /// Deliver one change to every listener on the document's collection whose
    /// filter matches. Listeners whose receiver is gone are pruned.
    fn notify(&mut self, kind: ChangeKind, document: &Document) {
        self.listeners.retain(|_, listener| {
            if listener.collection != document.reference.collection()
                || !listener.filter.matches(&document.fields)
            {
                return true;
            }
            let change = DocumentChange {
                kind,
                document: document.clone(),
            };
            listener.tx.send(Ok(vec![change])).is_ok()
        });
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    writes: AtomicU64,
    deletes: AtomicU64,
}

/// Document store kept entirely in process memory.
///
/// Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    /// Number of successful `add` and `update` calls.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls that removed a document.
    pub fn delete_count(&self) -> u64 {
        self.inner.deletes.load(Ordering::SeqCst)
    }

    /// Number of open subscriptions on `collection`.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.state()
            .listeners
            .values()
            .filter(|l| l.collection == collection && !l.tx.is_closed())
            .count()
    }

    /// Snapshot of every document in `collection`, oldest first.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let state = self.state();
        let Some(docs) = state.collections.get(collection) else {
            return Vec::new();
        };
        let mut entries: Vec<_> = docs.iter().collect();
        entries.sort_by_key(|(_, stored)| stored.seq);
        entries
            .into_iter()
            .map(|(id, stored)| Document {
                reference: DocumentRef::new(collection, id.as_str()),
                fields: stored.fields.clone(),
            })
            .collect()
    }

    /// Push a listener failure to every open subscription on `collection`.
    pub fn fail_subscriptions(&self, collection: &str, error: StoreError) {
        let state = self.state();
        for listener in state.listeners.values() {
            if listener.collection == collection {
                let _ = listener.tx.send(Err(error.clone()));
            }
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn add(&self, collection: &str, fields: Fields) -> Result<DocumentRef, StoreError> {
        let reference = DocumentRef::new(collection, Uuid::new_v4().simple().to_string());
        let mut state = self.state();

        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(
                reference.id().to_string(),
                StoredDocument {
                    seq,
                    fields: fields.clone(),
                },
            );
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        let document = Document {
            reference: reference.clone(),
            fields,
        };
        state.notify(ChangeKind::Added, &document);
        Ok(reference)
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError> {
        let state = self.state();
        Ok(state
            .collections
            .get(reference.collection())
            .and_then(|docs| docs.get(reference.id()))
            .map(|stored| Document {
                reference: reference.clone(),
                fields: stored.fields.clone(),
            }))
    }

    async fn update(&self, reference: &DocumentRef, fields: Fields) -> Result<(), StoreError> {
        let mut state = self.state();
        let seq = state.next_seq;

        let docs = state
            .collections
            .entry(reference.collection().to_string())
            .or_default();
        let (kind, merged) = match docs.get_mut(reference.id()) {
            Some(stored) => {
                stored.fields.extend(fields);
                (ChangeKind::Modified, stored.fields.clone())
            }
            None => {
                docs.insert(
                    reference.id().to_string(),
                    StoredDocument {
                        seq,
                        fields: fields.clone(),
                    },
                );
                (ChangeKind::Added, fields)
            }
        };
        if kind == ChangeKind::Added {
            state.next_seq += 1;
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        let document = Document {
            reference: reference.clone(),
            fields: merged,
        };
        state.notify(kind, &document);
        Ok(())
    }

    async fn delete(&self, reference: &DocumentRef) -> Result<bool, StoreError> {
        let mut state = self.state();
        let removed = state
            .collections
            .get_mut(reference.collection())
            .and_then(|docs| docs.remove(reference.id()));

        if let Some(stored) = removed {
            self.inner.deletes.fetch_add(1, Ordering::SeqCst);
            let document = Document {
                reference: reference.clone(),
                fields: stored.fields,
            };
            state.notify(ChangeKind::Removed, &document);
            return Ok(true);
        }
        Ok(false)
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();

        let mut snapshot: Vec<_> = state
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|(_, stored)| filter.matches(&stored.fields))
            .map(|(id, stored)| (stored.seq, id.clone(), stored.fields.clone()))
            .collect();
        snapshot.sort_by_key(|(seq, _, _)| *seq);

        if !snapshot.is_empty() {
            let batch = snapshot
                .into_iter()
                .map(|(_, id, fields)| {
                    DocumentChange::added(Document {
                        reference: DocumentRef::new(collection, id),
                        fields,
                    })
                })
                .collect();
            let _ = tx.send(Ok(batch));
        }

        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(
            id,
            Listener {
                collection: collection.to_string(),
                filter,
                tx,
            },
        );
        drop(state);

        tracing::debug!(collection, listener = id, "Live query opened");

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(
            collection,
            UnboundedReceiverStream::new(rx),
            move || {
                if let Some(inner) = inner.upgrade() {
                    lock(&inner.state).listeners.remove(&id);
                }
            },
        ))
    }
}

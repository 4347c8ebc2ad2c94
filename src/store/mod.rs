//! Document store client.
//!
//! The pairing handshake and the ICE refresh job talk to an
//! eventually-consistent document database through the [`DocumentStore`]
//! trait. Live queries are delivered as a [`Subscription`]: a stream of
//! change batches that ends when the subscription is closed or dropped.
//!
//! [`InMemoryStore`] is the bundled implementation, used by the server binary
//! and by tests.

mod memory;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::StoreError;

pub use memory::InMemoryStore;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// Location of a document: `<collection>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    collection: String,
    id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Parse a `collection/id` path.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        match path.split_once('/') {
            Some((collection, id))
                if !collection.is_empty() && !id.is_empty() && !id.contains('/') =>
            {
                Ok(Self::new(collection, id))
            }
            _ => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub reference: DocumentRef,
    pub fields: Fields,
}

impl Document {
    /// Decode the document fields into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

/// What happened to a document in a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: Document,
}

impl DocumentChange {
    pub fn added(document: Document) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
        }
    }
}

/// Changes delivered together, in store order.
pub type ChangeBatch = Vec<DocumentChange>;

/// Equality filter for a live query: `field == value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// Handle to a live query.
///
/// Yields `Ok(batch)` for each change batch and `Err(_)` when the store
/// reports a listener failure. Closing is idempotent and also happens on drop.
pub struct Subscription {
    collection: String,
    stream: UnboundedReceiverStream<Result<ChangeBatch, StoreError>>,
    unsubscribe: Option<Unsubscribe>,
}

impl Subscription {
    pub fn new(
        collection: impl Into<String>,
        stream: UnboundedReceiverStream<Result<ChangeBatch, StoreError>>,
        unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            collection: collection.into(),
            stream,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.unsubscribe.is_none()
    }

    /// Detach from the store. Batches already queued are discarded.
    pub fn close(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            self.stream.close();
            tracing::debug!(collection = %self.collection, "Subscription closed");
        }
    }
}

impl Stream for Subscription {
    type Item = Result<ChangeBatch, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.unsubscribe.is_none() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Backend-agnostic document store.
///
/// `delete` must be idempotent: deleting a missing document succeeds and
/// reports `false`. Only the call that actually removed the document sees
/// `true`, which is what makes an advertisement single-use.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a document with a generated id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<DocumentRef, StoreError>;

    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into the document, creating it if absent.
    async fn update(&self, reference: &DocumentRef, fields: Fields) -> Result<(), StoreError>;

    async fn delete(&self, reference: &DocumentRef) -> Result<bool, StoreError>;

    /// Open a live query over `collection`. The first batch holds every
    /// document already matching `filter`.
    async fn subscribe(&self, collection: &str, filter: Filter)
    -> Result<Subscription, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_ref_parse() {
        let reference = DocumentRef::parse("appInfo/appInfo").unwrap();
        assert_eq!(reference.collection(), "appInfo");
        assert_eq!(reference.id(), "appInfo");
        assert_eq!(reference.to_string(), "appInfo/appInfo");

        assert!(DocumentRef::parse("appInfo").is_err());
        assert!(DocumentRef::parse("/x").is_err());
        assert!(DocumentRef::parse("a/b/c").is_err());
    }

    #[test]
    fn test_filter_matches_exact_value() {
        let filter = Filter::eq("remoteCode", "111");
        let mut fields = Fields::new();
        fields.insert("remoteCode".to_string(), json!("111"));
        assert!(filter.matches(&fields));

        fields.insert("remoteCode".to_string(), json!(111));
        assert!(!filter.matches(&fields));

        fields.remove("remoteCode");
        assert!(!filter.matches(&fields));
    }
}

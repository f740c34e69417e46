use std::collections::BTreeMap;
use std::future::Future;
use wagerbook_types::{Amount, LedgerError};

#[cfg(any(test, feature = "mocks"))]
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

/// Per-player balance documents, keyed by player identifier.
pub const WINNINGS_COLLECTION: &str = "winnings";
pub const AMOUNT_FIELD: &str = "amount";

/// Singleton house configuration document.
pub const CONFIG_COLLECTION: &str = "config";
pub const MAX_BET_DOCUMENT: &str = "max_bet";
pub const MAX_FIELD: &str = "max";

/// Field name to value map making up a document.
pub type Fields = BTreeMap<String, Amount>;

/// Document store the ledger persists into.
///
/// A missing document is `Ok(None)`, never an error. Backend failures surface as
/// [`LedgerError::StoreUnavailable`].
pub trait Store: Send + Sync {
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Fields>, LedgerError>> + Send;

    /// Writes `fields` into the document. With `merge` the fields are folded into any
    /// existing document; without it the document is replaced.
    fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Every document in the collection, ordered by id.
    fn list_all(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<Vec<(String, Fields)>, LedgerError>> + Send;

    /// Adds `delta` to a numeric field (absent counts as zero) and returns the new value.
    /// A sum outside the decimal range fails with [`LedgerError::Overflow`] and writes nothing.
    ///
    /// The default is a plain read followed by a merge write and is subject to lost updates
    /// under concurrency. Backends with a native atomic update should override it.
    fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: Amount,
    ) -> impl Future<Output = Result<Amount, LedgerError>> + Send {
        async move {
            let current = self
                .get(collection, id)
                .await?
                .and_then(|fields| fields.get(field).copied())
                .unwrap_or_default();
            let next = crate::ledger::checked_sum(current, delta)?;
            self.set(collection, id, single_field(field, next), true)
                .await?;
            Ok(next)
        }
    }
}

pub fn single_field(field: &str, value: Amount) -> Fields {
    Fields::from([(field.to_string(), value)])
}

#[cfg(any(test, feature = "mocks"))]
type Collections = HashMap<String, BTreeMap<String, Fields>>;

/// In-memory store. `set_offline(true)` makes every call fail with
/// [`LedgerError::StoreUnavailable`].
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    collections: Mutex<Collections>,
    offline: AtomicBool,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn with_collections<R>(
        &self,
        f: impl FnOnce(&mut Collections) -> R,
    ) -> Result<R, LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable("memory store offline".into()));
        }
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| LedgerError::StoreUnavailable("memory store poisoned".into()))?;
        Ok(f(&mut collections))
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Store for Memory {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, LedgerError> {
        self.with_collections(|collections| {
            collections
                .get(collection)
                .and_then(|documents| documents.get(id))
                .cloned()
        })
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), LedgerError> {
        self.with_collections(|collections| {
            let documents = collections.entry(collection.to_string()).or_default();
            match documents.get_mut(id) {
                Some(existing) if merge => existing.extend(fields),
                _ => {
                    documents.insert(id.to_string(), fields);
                }
            }
        })
    }

    async fn list_all(&self, collection: &str) -> Result<Vec<(String, Fields)>, LedgerError> {
        self.with_collections(|collections| {
            collections
                .get(collection)
                .map(|documents| {
                    documents
                        .iter()
                        .map(|(id, fields)| (id.clone(), fields.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let store = Memory::default();
        assert_eq!(store.get(WINNINGS_COLLECTION, "alice").await.unwrap(), None);
        assert!(store.list_all(WINNINGS_COLLECTION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_merge_and_replace() {
        let store = Memory::default();
        let mut fields = single_field("a", dec!(1));
        fields.insert("b".into(), dec!(2));
        store.set("c", "doc", fields, false).await.unwrap();

        store
            .set("c", "doc", single_field("a", dec!(5)), true)
            .await
            .unwrap();
        let doc = store.get("c", "doc").await.unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&dec!(5)));
        assert_eq!(doc.get("b"), Some(&dec!(2)));

        store
            .set("c", "doc", single_field("a", dec!(7)), false)
            .await
            .unwrap();
        let doc = store.get("c", "doc").await.unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&dec!(7)));
        assert_eq!(doc.get("b"), None);
    }

    #[tokio::test]
    async fn test_default_increment() {
        let store = Memory::default();
        let value = store
            .increment(WINNINGS_COLLECTION, "bob", AMOUNT_FIELD, dec!(2.5))
            .await
            .unwrap();
        assert_eq!(value, dec!(2.5));
        let value = store
            .increment(WINNINGS_COLLECTION, "bob", AMOUNT_FIELD, dec!(-4))
            .await
            .unwrap();
        assert_eq!(value, dec!(-1.5));
    }

    #[tokio::test]
    async fn test_default_increment_overflow_writes_nothing() {
        let store = Memory::default();
        store
            .increment(WINNINGS_COLLECTION, "bob", AMOUNT_FIELD, Amount::MAX)
            .await
            .unwrap();
        assert_eq!(
            store
                .increment(WINNINGS_COLLECTION, "bob", AMOUNT_FIELD, dec!(1))
                .await,
            Err(LedgerError::Overflow)
        );
        let doc = store.get(WINNINGS_COLLECTION, "bob").await.unwrap().unwrap();
        assert_eq!(doc.get(AMOUNT_FIELD), Some(&Amount::MAX));
    }

    #[tokio::test]
    async fn test_list_all_is_ordered() {
        let store = Memory::default();
        for id in ["zed", "amy", "kim"] {
            store
                .set(WINNINGS_COLLECTION, id, single_field(AMOUNT_FIELD, dec!(1)), false)
                .await
                .unwrap();
        }
        let ids: Vec<_> = store
            .list_all(WINNINGS_COLLECTION)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["amy", "kim", "zed"]);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = Memory::default();
        store.set_offline(true);
        assert!(matches!(
            store.get(WINNINGS_COLLECTION, "alice").await,
            Err(LedgerError::StoreUnavailable(_))
        ));
        store.set_offline(false);
        assert!(store.get(WINNINGS_COLLECTION, "alice").await.is_ok());
    }
}

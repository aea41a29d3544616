//! In-process store.
//!
//! Keeps everything behind one lock. Suitable for single-node deployments and
//! tests; contents are lost on restart.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use super::{MessageId, MessageStore, QueuedMessage, Result, Session, SessionId, StoreError};

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, Session>,
    messages: BTreeMap<MessageId, QueuedMessage>,
    /// (session, processed = false) index.
    unprocessed: HashMap<SessionId, BTreeSet<MessageId>>,
    watchers: HashMap<SessionId, Arc<Notify>>,
    next_id: i64,
}

/// [`MessageStore`] held in memory, with insert notifications.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session rows ever created and not purged.
    pub fn session_count(&self) -> usize {
        self.tables.read().sessions.len()
    }

    /// Total number of message rows, processed or not.
    pub fn message_count(&self) -> usize {
        self.tables.read().messages.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create_session(&self, session_id: &SessionId) -> Result<Session> {
        let mut tables = self.tables.write();
        if tables.sessions.contains_key(session_id) {
            return Err(StoreError::SessionExists(session_id.clone()));
        }
        let session = Session::new(session_id.clone());
        tables.sessions.insert(session_id.clone(), session.clone());
        debug!(%session_id, "session created");
        Ok(session)
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        Ok(self.tables.read().sessions.get(session_id).cloned())
    }

    async fn insert_message(&self, session_id: &SessionId, payload: Value) -> Result<MessageId> {
        let mut tables = self.tables.write();
        if !tables.sessions.contains_key(session_id) {
            return Err(StoreError::SessionNotFound(session_id.clone()));
        }

        tables.next_id += 1;
        let id = MessageId(tables.next_id);
        tables.messages.insert(
            id,
            QueuedMessage {
                id,
                session_id: session_id.clone(),
                payload,
                created_at: Utc::now(),
                processed: false,
            },
        );
        tables
            .unprocessed
            .entry(session_id.clone())
            .or_default()
            .insert(id);

        if let Some(notify) = tables.watchers.get(session_id) {
            notify.notify_one();
        }
        Ok(id)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<QueuedMessage>> {
        Ok(self.tables.read().messages.get(&id).cloned())
    }

    async fn list_unprocessed(&self, session_id: &SessionId) -> Result<Vec<QueuedMessage>> {
        let tables = self.tables.read();
        let Some(ids) = tables.unprocessed.get(session_id) else {
            return Ok(Vec::new());
        };
        let mut batch: Vec<QueuedMessage> = ids
            .iter()
            .filter_map(|id| tables.messages.get(id).cloned())
            .collect();
        // Stable: equal timestamps keep id order.
        batch.sort_by_key(|message| message.created_at);
        Ok(batch)
    }

    async fn mark_processed(&self, ids: &[MessageId]) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(missing) = ids.iter().find(|id| !tables.messages.contains_key(*id)) {
            return Err(StoreError::MessageNotFound(*missing));
        }

        for id in ids {
            let Some(message) = tables.messages.get_mut(id) else {
                continue;
            };
            message.processed = true;
            let session_id = message.session_id.clone();
            if let Some(pending) = tables.unprocessed.get_mut(&session_id) {
                pending.remove(id);
                if pending.is_empty() {
                    tables.unprocessed.remove(&session_id);
                }
            }
        }
        Ok(())
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write();
        let before = tables.messages.len();
        tables
            .messages
            .retain(|_, message| !message.processed || message.created_at >= older_than);
        Ok((before - tables.messages.len()) as u64)
    }

    fn watch(&self, session_id: &SessionId) -> Option<Arc<Notify>> {
        let mut tables = self.tables.write();
        let notify = tables
            .watchers
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Notify::new()));
        Some(notify.clone())
    }

    fn unwatch(&self, session_id: &SessionId) {
        self.tables.write().watchers.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn store_with_session() -> (InMemoryStore, SessionId) {
        let store = InMemoryStore::new();
        let session_id = SessionId::generate();
        store.create_session(&session_id).await.unwrap();
        (store, session_id)
    }

    #[tokio::test]
    async fn create_session_rejects_duplicates() {
        let (store, session_id) = store_with_session().await;
        let result = store.create_session(&session_id).await;
        assert!(matches!(result, Err(StoreError::SessionExists(_))));
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn insert_requires_existing_session() {
        let store = InMemoryStore::new();
        let result = store
            .insert_message(&SessionId::from("unknown"), json!({"id": 1}))
            .await;
        assert!(matches!(result, Err(StoreError::SessionNotFound(_))));
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn lists_unprocessed_in_insertion_order() {
        let (store, session_id) = store_with_session().await;
        for n in 0..5 {
            store
                .insert_message(&session_id, json!({"id": n}))
                .await
                .unwrap();
        }

        let batch = store.list_unprocessed(&session_id).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|m| m.payload["id"].clone()).collect();
        assert_eq!(ids, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
        assert!(batch.iter().all(|m| !m.processed));
    }

    #[tokio::test]
    async fn lists_only_own_session() {
        let (store, first) = store_with_session().await;
        let second = SessionId::generate();
        store.create_session(&second).await.unwrap();

        store.insert_message(&first, json!("a")).await.unwrap();
        store.insert_message(&second, json!("b")).await.unwrap();

        let batch = store.list_unprocessed(&second).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, json!("b"));
    }

    #[tokio::test]
    async fn mark_processed_removes_from_unprocessed() {
        let (store, session_id) = store_with_session().await;
        let a = store.insert_message(&session_id, json!("a")).await.unwrap();
        let b = store.insert_message(&session_id, json!("b")).await.unwrap();

        store.mark_processed(&[a]).await.unwrap();

        let batch = store.list_unprocessed(&session_id).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, b);
        assert!(store.get_message(a).await.unwrap().unwrap().processed);

        // Marking twice keeps the flag set.
        store.mark_processed(&[a, b]).await.unwrap();
        assert!(store.list_unprocessed(&session_id).await.unwrap().is_empty());
        assert!(store.get_message(a).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn mark_processed_unknown_id_changes_nothing() {
        let (store, session_id) = store_with_session().await;
        let a = store.insert_message(&session_id, json!("a")).await.unwrap();

        let result = store.mark_processed(&[a, MessageId(999)]).await;
        assert!(matches!(result, Err(StoreError::MessageNotFound(MessageId(999)))));
        assert!(!store.get_message(a).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn purge_keeps_unprocessed_and_recent() {
        let (store, session_id) = store_with_session().await;
        let old = store.insert_message(&session_id, json!("old")).await.unwrap();
        let pending = store
            .insert_message(&session_id, json!("pending"))
            .await
            .unwrap();
        store.mark_processed(&[old]).await.unwrap();

        let removed = store
            .purge_processed(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .purge_processed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_message(old).await.unwrap().is_none());
        assert!(store.get_message(pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn watch_is_notified_on_insert() {
        let (store, session_id) = store_with_session().await;
        let notify = store.watch(&session_id).unwrap();

        store.insert_message(&session_id, json!("wake")).await.unwrap();

        // The permit is stored, so waiting after the insert still returns.
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("insert should notify the watcher");
    }

    #[tokio::test]
    async fn unwatch_drops_the_handle() {
        let (store, session_id) = store_with_session().await;
        let notify = store.watch(&session_id).unwrap();
        assert_eq!(Arc::strong_count(&notify), 2);

        store.unwatch(&session_id);

        assert_eq!(Arc::strong_count(&notify), 1);
        store.insert_message(&session_id, json!("late")).await.unwrap();
    }
}

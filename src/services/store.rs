use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Conversation, Message, NewMessage, Tag};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store query failed: {0}")]
    QueryFailed(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),
}

/// The durable-store contract the session manager needs. Rows are scoped
/// per owner; the store enforces owner-match visibility on reads.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation and return its store-assigned id. An absent
    /// owner is the null-owner sentinel for persisted guest sessions.
    async fn create_conversation(
        &self,
        owner_id: Option<&str>,
        title: &str,
    ) -> Result<String, StoreError>;

    async fn insert_messages(
        &self,
        conversation_id: &str,
        owner_id: Option<&str>,
        rows: &[NewMessage],
    ) -> Result<(), StoreError>;

    /// Messages filtered by conversation AND owner, ascending by creation
    /// time. A handle alone is not enough to read a conversation.
    async fn list_messages(
        &self,
        conversation_id: &str,
        owner_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError>;

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError>;

    async fn list_tag_associations(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Idempotent per (conversation, tag) pair; re-inserting an existing
    /// association is a no-op.
    async fn insert_tag_association(
        &self,
        conversation_id: &str,
        tag_id: &str,
    ) -> Result<(), StoreError>;

    async fn delete_tag_association(
        &self,
        conversation_id: &str,
        tag_id: &str,
    ) -> Result<(), StoreError>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation row. The id is assigned by the durable store at creation,
/// never client-generated. `owner_id` is None for guest sessions persisted
/// under the null-owner sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

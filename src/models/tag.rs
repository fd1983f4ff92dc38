use serde::{Deserialize, Serialize};

/// Static reference data shared across all conversations and actors.
/// Read-only from the session manager's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
}

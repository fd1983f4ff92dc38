use serde::{Deserialize, Serialize};

/// The signed-in actor as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub email: Option<String>,
}

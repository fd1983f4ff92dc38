use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::database::Database;

/// Session behavior knobs, persisted as a JSON settings row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Persist guest exchanges under the null-owner sentinel instead of
    /// keeping them memory-only.
    pub persist_guest_sessions: bool,
    pub reply_timeout_secs: u64,
    pub persist_write_attempts: u32,
    pub persist_retry_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist_guest_sessions: false,
            reply_timeout_secs: 30,
            persist_write_attempts: 3,
            persist_retry_delay_ms: 200,
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> SessionConfig {
        match db.get_setting("session_config").await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => SessionConfig::default(),
        }
    }

    pub async fn save(db: &Database, config: &SessionConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        db.set_setting("session_config", &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_row_yields_defaults() {
        let db = Database::new_in_memory().unwrap();
        let config = SettingsService::load(&db).await;
        assert!(!config.persist_guest_sessions);
        assert_eq!(config.reply_timeout_secs, 30);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let db = Database::new_in_memory().unwrap();

        let mut config = SessionConfig::default();
        config.persist_guest_sessions = true;
        config.persist_write_attempts = 5;
        SettingsService::save(&db, &config).await.unwrap();

        let loaded = SettingsService::load(&db).await;
        assert!(loaded.persist_guest_sessions);
        assert_eq!(loaded.persist_write_attempts, 5);
    }
}

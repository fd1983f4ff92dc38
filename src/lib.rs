//! Session state core for the DeepMirror reflection chat.
//!
//! Owns the in-memory transcript of one active conversation and keeps a
//! durable store consistent with it. The identity provider, reply
//! generator, and store are injected seams; see [`SessionManager`].

pub mod models;
pub mod providers;
pub mod services;

pub use models::{Actor, Conversation, Message, NewMessage, Role, Tag, TranscriptEntry};
pub use providers::{ChatMessage, GeminiGenerator, GeneratorError, Reply, ReplyGenerator, ReplyRequest};
pub use services::{
    AuthState, ConversationStore, Database, IdentityProvider, IdentityState, SessionConfig,
    SessionManager, SessionPhase, SettingsService, StoreError, SubmitOutcome,
};
pub use services::session::GREETING;

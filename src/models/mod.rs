pub mod actor;
pub mod conversation;
pub mod message;
pub mod tag;

pub use actor::Actor;
pub use conversation::Conversation;
pub use message::{Message, NewMessage, Role, TranscriptEntry};
pub use tag::Tag;

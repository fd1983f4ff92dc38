use crate::models::TranscriptEntry;
use crate::providers::ChatMessage;

const TITLE_MAX_CHARS: usize = 120;

/// Derive a conversation title from the first user turn: a bounded prefix,
/// set once at creation and immutable thereafter.
pub fn session_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "Untitled session".to_string();
    }
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}

/// Convert the transcript to the generator's request rows.
pub fn chat_messages(transcript: &[TranscriptEntry]) -> Vec<ChatMessage> {
    transcript
        .iter()
        .map(|entry| ChatMessage {
            role: entry.role,
            content: entry.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_kept_verbatim() {
        assert_eq!(session_title("I feel stuck"), "I feel stuck");
    }

    #[test]
    fn long_input_is_truncated_to_bounded_prefix() {
        let long = "x".repeat(400);
        let title = session_title(&long);
        assert_eq!(title.chars().count(), 120);
        assert!(long.starts_with(&title));
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let long = "å".repeat(200);
        let title = session_title(&long);
        assert_eq!(title.chars().count(), 120);
    }

    #[test]
    fn empty_input_falls_back() {
        assert_eq!(session_title("   "), "Untitled session");
    }
}

use url::Url;

const CONVERSATION_PARAM: &str = "conversationId";

/// Extract the conversation id from a shareable session locator. Absent or
/// empty parameters read as no handle.
pub fn conversation_id_from_locator(locator: &str) -> Option<String> {
    let url = Url::parse(locator).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == CONVERSATION_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Rewrite a locator to reference a conversation, replacing any existing
/// reference.
pub fn locator_with_conversation_id(
    locator: &str,
    conversation_id: &str,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(locator)?;
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != CONVERSATION_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(CONVERSATION_PARAM, conversation_id);
    Ok(url.to_string())
}

/// Strip the conversation reference from a locator (the "new session" URL).
pub fn locator_without_conversation_id(locator: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(locator)?;
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != CONVERSATION_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if retained.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(retained);
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_conversation_id_from_query() {
        let id = conversation_id_from_locator("https://app.test/chat?conversationId=abc-123");
        assert_eq!(id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn missing_or_empty_parameter_reads_as_no_handle() {
        assert_eq!(conversation_id_from_locator("https://app.test/chat"), None);
        assert_eq!(
            conversation_id_from_locator("https://app.test/chat?conversationId="),
            None
        );
        assert_eq!(conversation_id_from_locator("not a url"), None);
    }

    #[test]
    fn writing_replaces_existing_reference_and_keeps_other_params() {
        let out = locator_with_conversation_id(
            "https://app.test/chat?lang=en&conversationId=old",
            "new-id",
        )
        .unwrap();
        assert_eq!(conversation_id_from_locator(&out).as_deref(), Some("new-id"));
        assert!(out.contains("lang=en"));
        assert!(!out.contains("old"));
    }

    #[test]
    fn stripping_removes_the_query_when_nothing_else_remains() {
        let out =
            locator_without_conversation_id("https://app.test/chat?conversationId=abc").unwrap();
        assert_eq!(out, "https://app.test/chat");

        let out =
            locator_without_conversation_id("https://app.test/chat?lang=en&conversationId=abc")
                .unwrap();
        assert!(out.contains("lang=en"));
        assert_eq!(conversation_id_from_locator(&out), None);
    }
}

use async_trait::async_trait;
use reqwest::Client;

use super::models::*;
use crate::models::Role;
use crate::providers::traits::ReplyGenerator;
use crate::providers::types::{GeneratorError, Reply, ReplyRequest};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Reply generator backed by the Gemini REST API. The reflection persona
/// and the actor's age hint travel as the system instruction; the topic
/// safety policy itself is the model's concern, not ours.
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Parse an API error response body into a user-friendly message.
    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(msg) = parsed["error"]["message"].as_str() {
                return format!("HTTP {}: {}", status.as_u16(), msg);
            }
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }

    fn build_contents(request: &ReplyRequest) -> Vec<GeminiContent> {
        request
            .messages
            .iter()
            .map(|msg| GeminiContent {
                role: Self::translate_role(&msg.role).to_string(),
                parts: vec![GeminiPart {
                    text: Some(msg.content.clone()),
                }],
            })
            .collect()
    }

    fn system_prompt(age_hint: Option<&str>) -> String {
        let age = match age_hint {
            Some(a) if !a.trim().is_empty() => a.trim(),
            _ => "unknown",
        };
        format!(
            "You are DeepMirror, an AI for reflection and self-understanding. \
             You are NOT a doctor or therapist and you do NOT give medical advice. \
             You ask gentle questions, help the user notice patterns, and suggest \
             small next steps. User age: {age}. Be warm, empathetic, and thoughtful. \
             Keep responses concise but meaningful."
        )
    }
}

#[async_trait]
impl ReplyGenerator for GeminiGenerator {
    async fn generate(&self, request: ReplyRequest) -> Result<Reply, GeneratorError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let gemini_request = GeminiRequest {
            contents: Self::build_contents(&request),
            system_instruction: Some(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: Some(Self::system_prompt(request.age_hint.as_deref())),
                }],
            }),
            generation_config: self.temperature.map(|t| GeminiGenerationConfig {
                temperature: Some(t),
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| GeneratorError::NetworkError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(GeneratorError::AuthError("Invalid API key".to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeneratorError::RateLimited {
                retry_after_secs: None,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        if let Some(error) = gemini_response.error {
            return Err(GeneratorError::RequestFailed(
                error.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let content = gemini_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().filter_map(|p| p.text).next())
            .ok_or_else(|| {
                GeneratorError::InvalidResponse("No content in response".to_string())
            })?;

        Ok(Reply { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::ChatMessage;

    #[test]
    fn system_prompt_includes_age_hint() {
        let prompt = GeminiGenerator::system_prompt(Some("25"));
        assert!(prompt.contains("User age: 25."));
    }

    #[test]
    fn system_prompt_falls_back_to_unknown_age() {
        assert!(GeminiGenerator::system_prompt(None).contains("User age: unknown."));
        assert!(GeminiGenerator::system_prompt(Some("  ")).contains("User age: unknown."));
    }

    #[test]
    fn assistant_turns_map_to_model_role() {
        let request = ReplyRequest {
            messages: vec![
                ChatMessage {
                    role: Role::Assistant,
                    content: "What's on your mind today?".to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "I feel stuck".to_string(),
                },
            ],
            age_hint: None,
            actor_email: None,
        };

        let contents = GeminiGenerator::build_contents(&request);
        assert_eq!(contents[0].role, "model");
        assert_eq!(contents[1].role, "user");
        assert_eq!(contents[1].parts[0].text.as_deref(), Some("I feel stuck"));
    }
}

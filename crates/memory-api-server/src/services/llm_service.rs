use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::LlmConfig;
use crate::database::TurnRow;
use crate::models::chat::ChatMessage;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    base_system_prompt: String,
}

impl LlmService {
    pub fn new(config: LlmConfig, base_system_prompt: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .expect("Failed to create HTTP client"),
            config,
            base_system_prompt,
        }
    }

    /// Assemble the full message list for one reply: system prompt carrying
    /// the long-term summary and KB sections, then the recent turns replayed
    /// as user/assistant pairs, then the current message.
    pub fn build_messages(
        &self,
        message: &str,
        history: &[TurnRow],
        customer_summary: Option<&str>,
        kb_sections: &BTreeMap<String, Vec<String>>,
    ) -> Vec<ChatMessage> {
        let mut system_prompt = self.base_system_prompt.clone();

        if let Some(summary) = customer_summary {
            system_prompt.push_str("\n\nCUSTOMER MEMORY:\n");
            system_prompt.push_str(summary);
        }

        for (section, snippets) in kb_sections {
            if snippets.is_empty() {
                continue;
            }
            system_prompt.push_str(&format!("\n\n{}:\n", section));
            for snippet in snippets {
                system_prompt.push_str("- ");
                system_prompt.push_str(snippet);
                system_prompt.push('\n');
            }
        }

        let mut messages = vec![ChatMessage::system(system_prompt)];

        // History is already capped at the retrieval window by the memory
        // subsystem
        for turn in history {
            messages.push(ChatMessage::user(&turn.user_message));
            messages.push(ChatMessage::assistant(&turn.assistant_reply));
        }

        messages.push(ChatMessage::user(message));
        messages
    }

    /// Generate a completion, waiting for the full response.
    pub async fn generate_chat(&self, messages: Vec<ChatMessage>) -> Result<String, ApiError> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to call LLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!(
                "LLM API error: {} - {}",
                status, body
            )));
        }

        #[derive(Deserialize)]
        struct ChatCompletionResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to parse LLM response: {}", e)))?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ApiError::LlmError("No choices returned from LLM".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn service() -> LlmService {
        LlmService::new(
            LlmConfig {
                base_url: "http://localhost:8080".to_string(),
                model: "test-model".to_string(),
                timeout_seconds: 5,
                max_tokens: 256,
                temperature: 0.7,
            },
            "You are a helpful assistant.".to_string(),
        )
    }

    #[test]
    fn history_replays_as_alternating_pairs() {
        let history = vec![
            TurnRow {
                user_message: "hi".to_string(),
                assistant_reply: "hello".to_string(),
                created_at: Utc::now(),
            },
            TurnRow {
                user_message: "prices?".to_string(),
                assistant_reply: "sure".to_string(),
                created_at: Utc::now(),
            },
        ];

        let messages = service().build_messages("and shipping?", &history, None, &BTreeMap::new());

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(
            roles,
            vec!["system", "user", "assistant", "user", "assistant", "user"]
        );
        assert_eq!(messages.last().unwrap().content, "and shipping?");
    }

    #[test]
    fn summary_and_sections_land_in_system_prompt() {
        let mut sections = BTreeMap::new();
        sections.insert(
            "PRODUCT_DATA".to_string(),
            vec!["Protein bar, 20g".to_string()],
        );
        sections.insert("COMPANY_DATA".to_string(), Vec::new());

        let messages =
            service().build_messages("hi", &[], Some("Returning customer: likes bars"), &sections);

        let system = &messages[0].content;
        assert!(system.contains("CUSTOMER MEMORY:"));
        assert!(system.contains("Returning customer: likes bars"));
        assert!(system.contains("PRODUCT_DATA:"));
        assert!(system.contains("- Protein bar, 20g"));
        // Empty sections are omitted entirely
        assert!(!system.contains("COMPANY_DATA"));
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SummarizerConfig;
use crate::database::TurnRow;
use crate::models::chat::ChatMessage;
use crate::services::memory::manager::SummaryProvider;
use crate::utils::error::MemoryError;

const SUMMARIZE_PROMPT: &str = r#"You are a customer service representative creating detailed notes about this customer based on their conversation history. Create a summary that would help any agent understand this customer.

Focus on:
- Customer profile: what type of customer they are, communication style, knowledge level
- Interests and preferences: products they care about, price sensitivity, goals
- Questions and concerns: what they asked, objections raised, hesitations
- Purchase behavior: stage in the buying journey, specific requirements
- Important notes: personal details shared, follow-up actions needed

Conversation history:
{{CONVERSATION}}

Customer service summary:"#;

const UPDATE_PROMPT: &str = r#"You are updating customer service notes. Merge the existing customer summary with new insights from recent conversations. Preserve all important historical information, add new insights, update preferences, and remove outdated or contradictory details.

EXISTING CUSTOMER SUMMARY:
{{EXISTING}}

NEW CONVERSATION INSIGHTS:
{{INSIGHTS}}

UPDATED CUSTOMER SUMMARY:"#;

#[derive(Debug, Serialize)]
struct SummarizeRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    choices: Vec<SummarizeChoice>,
}

#[derive(Debug, Deserialize)]
struct SummarizeChoice {
    message: SummarizeMessage,
}

#[derive(Debug, Deserialize)]
struct SummarizeMessage {
    content: String,
}

/// Long-term memory summarization over the OpenAI-compatible endpoint.
/// A cheaper model than the answering one; failures are non-fatal to every
/// caller (the compactor retries at the next trigger).
pub struct SummarizerService {
    client: Client,
    base_url: String,
    config: SummarizerConfig,
}

impl SummarizerService {
    pub fn new(base_url: String, config: SummarizerConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to create HTTP client"),
            base_url,
            config,
        }
    }

    fn render_conversation(turns: &[TurnRow]) -> String {
        let mut text = String::new();
        for turn in turns {
            text.push_str("Customer: ");
            text.push_str(&turn.user_message);
            text.push('\n');
            text.push_str("Assistant: ");
            text.push_str(&turn.assistant_reply);
            text.push_str("\n\n");
        }
        text
    }

    async fn complete(&self, prompt: String, max_tokens: usize) -> Result<String, MemoryError> {
        let request = SummarizeRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens,
            temperature: 0.3,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::Summarization(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Summarization(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let parsed: SummarizeResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Summarization(format!("bad response: {}", e)))?;

        parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MemoryError::Summarization("empty completion".to_string()))
    }
}

#[async_trait]
impl SummaryProvider for SummarizerService {
    async fn summarize(&self, turns: &[TurnRow]) -> Result<String, MemoryError> {
        debug!("Summarizing {} turns", turns.len());

        let prompt = SUMMARIZE_PROMPT.replace("{{CONVERSATION}}", &Self::render_conversation(turns));
        self.complete(prompt, self.config.max_tokens).await
    }

    async fn update_summary(
        &self,
        existing: &str,
        turns: &[TurnRow],
    ) -> Result<String, MemoryError> {
        debug!("Merging {} turns into existing summary", turns.len());

        // Two passes, as with a fresh summary: condense the new turns first,
        // then merge with the stored notes
        let insights = self.summarize(turns).await?;

        let prompt = UPDATE_PROMPT
            .replace("{{EXISTING}}", existing)
            .replace("{{INSIGHTS}}", &insights);
        self.complete(prompt, self.config.merge_max_tokens).await
    }
}

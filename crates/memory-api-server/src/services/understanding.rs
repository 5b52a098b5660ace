use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::UnderstandingConfig;
use crate::database::TurnRow;
use crate::models::chat::ChatMessage;

/// Structured result of the fast intent/query-expansion pass.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageAnalysis {
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub expanded_query: String,
    #[serde(default)]
    pub need_clarification: bool,
    #[serde(default)]
    pub follow_up_question: Option<String>,
}

impl MessageAnalysis {
    /// Fallback when the classifier is unavailable or returns garbage.
    fn general(message: &str) -> Self {
        Self {
            intents: vec!["general".to_string()],
            expanded_query: message.to_string(),
            need_clarification: false,
            follow_up_question: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    choices: Vec<AnalyzeChoice>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeChoice {
    message: AnalyzeMessage,
}

#[derive(Debug, Deserialize)]
struct AnalyzeMessage {
    content: String,
}

/// Extract first JSON object substring from a possibly noisy LLM output.
/// Handles nested braces and braces inside JSON strings (with escapes).
fn extract_first_json_object(s: &str) -> Option<&str> {
    let mut start: Option<usize> = None;
    let mut depth: i32 = 0;

    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if start.is_none() {
            if ch == '{' {
                start = Some(i);
                depth = 1;
                in_string = false;
                escaped = false;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let st = start?;
                    return Some(&s[st..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Lighter-weight LLM pass classifying intent and expanding the retrieval
/// query. Strictly best-effort: every failure degrades to a `general` intent
/// with the raw message as the query.
pub struct UnderstandingService {
    client: Client,
    base_url: String,
    config: UnderstandingConfig,
}

impl UnderstandingService {
    pub fn new(base_url: String, config: UnderstandingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url,
            config,
        }
    }

    pub async fn analyze(&self, message: &str, last_turns: &[TurnRow]) -> MessageAnalysis {
        match self.try_analyze(message, last_turns).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Understanding pass failed, defaulting to general: {}", e);
                MessageAnalysis::general(message)
            }
        }
    }

    async fn try_analyze(
        &self,
        message: &str,
        last_turns: &[TurnRow],
    ) -> anyhow::Result<MessageAnalysis> {
        // Only the last two turns are worth the tokens for reference
        // resolution
        let context: String = last_turns
            .iter()
            .rev()
            .take(2)
            .rev()
            .map(|t| format!("User: {}\nAssistant: {}", t.user_message, t.assistant_reply))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"You are a fast intent and query-expansion assistant.
Given the current user message and the last turns, do ALL of the following:
1) Resolve references (e.g., "it", "that") into explicit entities.
2) Classify intents - one or more of: ["product", "company", "general"].
3) Produce an expanded retrieval query with synonyms and constraints when relevant.
4) If clarification is required, set need_clarification=true and propose a brief follow_up_question.

Return STRICT JSON with these keys only:
{{"intents": [...], "expanded_query": string, "need_clarification": boolean, "follow_up_question": string or null}}

Last turns:
{context}

Current user message:
{message}

JSON only:"#
        );

        let request = AnalyzeRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let parsed: AnalyzeResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let json = extract_first_json_object(content)
            .ok_or_else(|| anyhow::anyhow!("no JSON object in reply"))?;

        let mut analysis: MessageAnalysis = serde_json::from_str(json)?;

        if analysis.intents.is_empty() {
            analysis.intents.push("general".to_string());
        }
        if analysis.expanded_query.is_empty() {
            analysis.expanded_query = message.to_string();
        }

        debug!(
            "Analysis: intents={:?}, query={}",
            analysis.intents, analysis.expanded_query
        );

        Ok(analysis)
    }
}

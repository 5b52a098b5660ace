use axum::{extract::Extension, Json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::models::chat::{ChatRequest, ChatResponse};
use crate::services::memory::MemoryManager;
use crate::services::{KnowledgeService, LlmService, UnderstandingService};
use crate::utils::error::ApiError;

pub async fn chat_handler(
    Extension(memory): Extension<Arc<MemoryManager>>,
    Extension(understanding): Extension<Arc<UnderstandingService>>,
    Extension(knowledge): Extension<Arc<KnowledgeService>>,
    Extension(llm): Extension<Arc<LlmService>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let start_time = Instant::now();

    if request.customer_id.trim().is_empty() {
        return Err(ApiError::BadRequest("customer_id is required".to_string()));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }

    info!(
        "Chat request: customer={}, message_len={}",
        request.customer_id,
        request.message.len()
    );

    // Memory context first: recent turns, session id, optional long-term
    // summary. Never fails; worst case is an empty context.
    let context = memory.get_context(&request.customer_id).await;
    debug!(
        "Memory: {} turns, hybrid={}, session={}",
        context.turns.len(),
        context.use_hybrid,
        context.session_id
    );

    // Fast pass: intent classification + query expansion
    let analysis = understanding.analyze(&request.message, &context.turns).await;

    // Knowledge sections for the detected intents
    let kb_sections = knowledge
        .build_sections(&analysis.intents, &analysis.expanded_query)
        .await;

    // Answer generation
    let messages = llm.build_messages(
        &request.message,
        &context.turns,
        context.summary.as_deref(),
        &kb_sections,
    );
    let response_text = llm.generate_chat(messages).await?;

    let response_time_ms = start_time.elapsed().as_millis() as u64;

    // The caller already has its answer; persistence and any compaction it
    // triggers happen off the critical path.
    memory.record_turn(
        &request.customer_id,
        context.session_id,
        request.message,
        response_text.clone(),
        Some(response_time_ms as i32),
    );

    info!("Chat completed in {}ms", response_time_ms);

    Ok(Json(ChatResponse {
        response: response_text,
        session_id: context.session_id,
        used_hybrid: context.use_hybrid,
        response_time_ms,
    }))
}

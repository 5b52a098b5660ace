pub mod embedding_service;
pub mod knowledge;
pub mod llm_service;
pub mod memory;
pub mod summarizer;
pub mod understanding;

pub use embedding_service::EmbeddingService;
pub use knowledge::KnowledgeService;
pub use llm_service::LlmService;
pub use summarizer::SummarizerService;
pub use understanding::UnderstandingService;

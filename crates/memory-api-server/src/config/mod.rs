pub mod settings;

pub use settings::{
    DatabaseConfig, EmbeddingConfig, KnowledgeConfig, LlmConfig, MemoryConfig, PromptsConfig,
    ServerConfig, Settings, SummarizerConfig, UnderstandingConfig,
};

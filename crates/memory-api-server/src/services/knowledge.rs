use pgvector::Vector;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::KnowledgeConfig;
use crate::database::Repository;

use super::embedding_service::EmbeddingService;

/// Assembles knowledge-base sections for the answering prompt based on the
/// detected intents. Everything here is best-effort: a failed lookup yields
/// an empty section, never an error.
pub struct KnowledgeService {
    repository: Arc<Repository>,
    embeddings: Arc<EmbeddingService>,
    config: KnowledgeConfig,
}

impl KnowledgeService {
    pub fn new(
        repository: Arc<Repository>,
        embeddings: Arc<EmbeddingService>,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            repository,
            embeddings,
            config,
        }
    }

    pub async fn build_sections(
        &self,
        intents: &[String],
        query: &str,
    ) -> BTreeMap<String, Vec<String>> {
        let mut sections = BTreeMap::new();

        let has_product_intent = intents.iter().any(|i| i == "product");
        let has_company_intent = intents.iter().any(|i| i == "company");

        if has_product_intent {
            sections.insert("PRODUCT_DATA".to_string(), self.product_snippets(query).await);
        }

        if has_company_intent {
            sections.insert("COMPANY_DATA".to_string(), self.company_snippets().await);
        }

        sections
    }

    async fn product_snippets(&self, query: &str) -> Vec<String> {
        let embedding = match self.embeddings.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Product context embedding failed: {}", e);
                return Vec::new();
            }
        };

        match self
            .repository
            .search_product_snippets(
                Vector::from(embedding),
                self.config.similarity_threshold,
                self.config.top_k,
            )
            .await
        {
            Ok(snippets) => {
                debug!("Product section: {} snippets", snippets.len());
                snippets
            }
            Err(e) => {
                warn!("Product context retrieval failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn company_snippets(&self) -> Vec<String> {
        match self
            .repository
            .fetch_company_snippets(self.config.company_snippet_limit)
            .await
        {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!("Company context retrieval failed: {}", e);
                Vec::new()
            }
        }
    }
}

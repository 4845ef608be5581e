//! LLM completion adapter used by `query.rs` (RAG synthesis) and
//! `enrichment.rs` (date extraction). Embeddings live in `vector_store.rs`'s
//! `Embedder` trait; this module only covers prompt-in/text-out completion.
//!
//! Generalizes the teacher's `llm.rs::answer_with_openai` (a single
//! hard-coded Spanish system prompt plus knowledge-graph entity/relation
//! extraction tied to the Neo4j schema) into a provider-agnostic
//! `Completion` trait. The graph-extraction half has no counterpart in this
//! archive's data model and is dropped rather than ported.

use async_trait::async_trait;

use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Rig-backed completion, generalizing the teacher's
/// `client.agent(model_name).preamble(...).build()` call shape off its one
/// hard-coded model name and prompt.
pub struct RigCompletion {
    model_name: String,
}

impl RigCompletion {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl Completion for RigCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let model_name = if self.model_name.is_empty() {
            "gpt-4o-mini"
        } else {
            self.model_name.as_str()
        };

        let mut builder = client.agent(model_name).preamble(&request.system_prompt);
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        let agent = builder.build();

        agent
            .prompt(&request.prompt)
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("llm completion: {e}")))
    }
}

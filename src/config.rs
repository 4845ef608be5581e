//! Configuration loading (§6.6). Generalizes the teacher's
//! `AppConfig::from_env` (dotenvy + `std::env::var`, required-vs-default
//! split) to the archive's key set instead of Neo4j/axum's.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("unsupported LLM provider: {other}")),
        }
    }
}

/// Complete application configuration (§6.6).
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub vault_path: String,
    pub lifearch_home: String,
    pub redis_url: String,
    pub qdrant_url: String,

    pub llm_provider: LlmProvider,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub llm_model: String,
    pub ollama_url: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub ingestion_concurrency: usize,
    pub max_folders: usize,
    pub debounce_seconds: f64,
    pub auto_tagging_enabled: bool,

    pub redis_connect_timeout: Duration,
    pub llm_timeout: Duration,
    pub date_extraction_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from the environment (reading `.env` if present),
    /// mirroring the teacher's required-vs-default-with-fallback pattern.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let vault_path = env::var("VAULT_PATH").unwrap_or_else(|_| "./vault".to_string());
        let lifearch_home =
            env::var("LIFEARCH_HOME").unwrap_or_else(|_| "./.lifearchive".to_string());
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let qdrant_url =
            env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6333".to_string());

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let embedding_model =
            env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let embedding_dim = env_parse("EMBEDDING_DIM", 1536)?;
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let ollama_url =
            env::var("OLLAMA_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string());

        let chunk_size = env_parse("CHUNK_SIZE", 2600)?;
        let chunk_overlap = env_parse("CHUNK_OVERLAP", 200)?;
        let ingestion_concurrency = env_parse("INGESTION_CONCURRENCY", 5)?;
        let max_folders = env_parse("MAX_FOLDERS", 100)?;
        let debounce_seconds = env_parse("DEBOUNCE_SECONDS", 2.0)?;
        let auto_tagging_enabled = env_parse("ENABLE_AUTO_TAGGING", false)?;

        Ok(Self {
            vault_path,
            lifearch_home,
            redis_url,
            qdrant_url,
            llm_provider,
            embedding_model,
            embedding_dim,
            llm_model,
            ollama_url,
            chunk_size,
            chunk_overlap,
            ingestion_concurrency,
            max_folders,
            debounce_seconds,
            auto_tagging_enabled,
            redis_connect_timeout: Duration::from_secs(5),
            llm_timeout: Duration::from_secs(300),
            date_extraction_timeout: Duration::from_secs(120),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_provider_parses_case_insensitively() {
        assert_eq!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI);
        assert!(LlmProvider::from_str("bogus").is_err());
    }
}

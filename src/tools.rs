//! Tool surface (§6.5/§9): the operations consumed by an external calling
//! layer, exposed as a tagged-variant `Tool` enum dispatched through one
//! registry function rather than runtime class lookup.
//!
//! Grounded on `examples/johnzfitch-llmx/ingestor-core/src/mcp/tools.rs`'s
//! input/output struct-per-tool shape and free-function handler style — the
//! teacher carries no tool surface of its own.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enrichment::{looks_like_a_date, DATE_EXTRACTION_MAX_CHARS, DATE_EXTRACTION_SYSTEM_PROMPT};
use crate::error::{ArchiveError, Result};
use crate::ingestion::{IngestRequest, IngestionPipeline};
use crate::llm::{Completion, CompletionRequest};
use crate::query::QueryService;
use crate::search::{SearchMode, SearchResult, SearchService};
use crate::tracker::FilterSpec;

const DATE_EXTRACTION_TEMPERATURE: f64 = 0.1;
const DATE_EXTRACTION_MAX_TOKENS: u64 = 1000;
const RESPONSE_MODES: [&str; 4] = ["tree_summarize", "compact", "refine", "simple_summarize"];

// --- file.import -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FileImportInput {
    pub path: String,
    #[serde(default)]
    pub mime_hint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileImportOutput {
    pub file_id: String,
    pub hash: String,
    pub size: u64,
    pub mime_type: String,
    pub status: String,
}

async fn file_import(deps: &ToolDeps, input: FileImportInput) -> Result<FileImportOutput> {
    let request = IngestRequest {
        path: input.path.into(),
        mime_hint: input.mime_hint,
        tags: input.tags,
        metadata: input.metadata,
        session_id: input.session_id,
        document_id: None,
    };
    let response = deps.ingestion.ingest(request).await?;
    Ok(FileImportOutput {
        file_id: response.file_id,
        hash: response.hash,
        size: response.size,
        mime_type: response.mime_type,
        status: response.status.as_str().to_string(),
    })
}

// --- extract.text ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ExtractTextInput {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractTextOutput {
    pub text: String,
    pub metadata: Value,
}

/// `file_id`/`file_hash` are accepted for correlation with the caller's
/// records but are not resolvable to a path on their own — the vault indexes
/// by hash plus extension, and the extension isn't recoverable from a hash
/// alone. Callers must supply `file_path`.
async fn extract_text_tool(input: ExtractTextInput) -> Result<ExtractTextOutput> {
    let path = input.file_path.ok_or_else(|| {
        ArchiveError::Validation("extract.text requires file_path".to_string())
    })?;
    let path = Path::new(&path);
    let mime_type = input.mime_type.unwrap_or_else(|| {
        mime_guess::from_path(path).first_or_octet_stream().to_string()
    });

    let extracted = crate::extract::extract_text(path, &mime_type).await;
    let metadata = crate::extract::extract_metadata(path, &mime_type).await;
    Ok(ExtractTextOutput {
        text: extracted.text,
        metadata: Value::Object(metadata.into_iter().collect()),
    })
}

// --- llamaindex.query --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueryToolInput {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub similarity_top_k: usize,
    #[serde(default = "default_response_mode")]
    pub response_mode: String,
}

fn default_top_k() -> usize {
    5
}

fn default_response_mode() -> String {
    "tree_summarize".to_string()
}

#[derive(Debug, Serialize)]
pub struct QueryToolOutput {
    pub answer: String,
    pub confidence: f64,
    pub sources: Vec<SearchResult>,
    pub method: &'static str,
    pub metadata: Value,
}

/// `response_mode` is validated against the accepted set but does not yet
/// change synthesis behaviour — the query engine has one context-assembly
/// strategy regardless of which mode is requested.
async fn query_tool(deps: &ToolDeps, input: QueryToolInput) -> Result<QueryToolOutput> {
    if !RESPONSE_MODES.contains(&input.response_mode.as_str()) {
        return Err(ArchiveError::Validation(format!(
            "unknown response_mode: {}",
            input.response_mode
        )));
    }
    let response = deps
        .query
        .query_with_top_k(&input.question, input.similarity_top_k)
        .await?;
    Ok(QueryToolOutput {
        answer: response.answer,
        confidence: response.confidence_score,
        sources: response.sources,
        method: response.method,
        metadata: response.statistics,
    })
}

// --- index.search -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchToolInput {
    pub query: String,
    #[serde(default = "default_search_mode")]
    pub mode: String,
    #[serde(default)]
    pub filters: HashMap<String, Value>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub include_content: bool,
}

fn default_search_mode() -> String {
    "hybrid".to_string()
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct SearchToolOutput {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub query_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn search_tool(deps: &ToolDeps, input: SearchToolInput) -> Result<SearchToolOutput> {
    let started = Instant::now();
    let mode = match input.mode.as_str() {
        "semantic" => SearchMode::Semantic,
        "keyword" => SearchMode::Keyword,
        "hybrid" => SearchMode::Hybrid,
        other => {
            return Ok(SearchToolOutput {
                results: Vec::new(),
                total: 0,
                query_time_ms: started.elapsed().as_millis() as u64,
                error: Some(format!("unknown search mode: {other}")),
            })
        }
    };
    let filters: HashMap<String, FilterSpec> = input
        .filters
        .into_iter()
        .map(|(k, v)| (k, to_filter_spec(v)))
        .collect();
    let fetch_k = (input.limit + input.offset).max(1);

    match deps.search.search(&input.query, mode, fetch_k, &filters).await {
        Ok(results) => {
            let mut results: Vec<SearchResult> =
                results.into_iter().skip(input.offset).take(input.limit).collect();
            if !input.include_content {
                for r in &mut results {
                    r.text = None;
                }
            }
            Ok(SearchToolOutput {
                total: results.len(),
                results,
                query_time_ms: started.elapsed().as_millis() as u64,
                error: None,
            })
        }
        Err(ArchiveError::Validation(message)) => Ok(SearchToolOutput {
            results: Vec::new(),
            total: 0,
            query_time_ms: started.elapsed().as_millis() as u64,
            error: Some(message),
        }),
        Err(err) => Err(err),
    }
}

fn to_filter_spec(value: Value) -> FilterSpec {
    match value {
        Value::Object(map) => FilterSpec::Ops(map.into_iter().collect()),
        other => FilterSpec::Eq(other),
    }
}

// --- date.extract (synchronous counterpart of the date_extraction task) ------

#[derive(Debug, Deserialize)]
pub struct DateExtractInput {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct DateExtractOutput {
    pub date: Option<String>,
}

async fn date_extract_tool(deps: &ToolDeps, input: DateExtractInput) -> Result<DateExtractOutput> {
    let truncated: String = input.text.chars().take(DATE_EXTRACTION_MAX_CHARS).collect();
    let request = CompletionRequest::new(DATE_EXTRACTION_SYSTEM_PROMPT, format!("Text:\n{truncated}"))
        .with_temperature(DATE_EXTRACTION_TEMPERATURE)
        .with_max_tokens(DATE_EXTRACTION_MAX_TOKENS);
    let answer = deps.completion.complete(request).await?;
    let date = looks_like_a_date(&answer).then(|| answer.trim().to_string());
    Ok(DateExtractOutput { date })
}

// --- ollama (raw completion passthrough, no retrieval) ------------------------

#[derive(Debug, Deserialize)]
pub struct OllamaInput {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OllamaOutput {
    pub text: String,
}

async fn ollama_tool(deps: &ToolDeps, input: OllamaInput) -> Result<OllamaOutput> {
    let system_prompt = input
        .system_prompt
        .unwrap_or_else(|| "You are a helpful assistant.".to_string());
    let text = deps
        .completion
        .complete(CompletionRequest::new(system_prompt, input.prompt))
        .await?;
    Ok(OllamaOutput { text })
}

// --- registry ------------------------------------------------------------------

pub enum Tool {
    FileImport(FileImportInput),
    ExtractText(ExtractTextInput),
    Query(QueryToolInput),
    Search(SearchToolInput),
    DateExtract(DateExtractInput),
    Ollama(OllamaInput),
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::FileImport(_) => "file.import",
            Tool::ExtractText(_) => "extract.text",
            Tool::Query(_) => "llamaindex.query",
            Tool::Search(_) => "index.search",
            Tool::DateExtract(_) => "date.extract",
            Tool::Ollama(_) => "ollama.complete",
        }
    }
}

/// Explicit dependency-injection struct (§9's design note) in place of
/// module-global clients.
pub struct ToolDeps {
    pub ingestion: Arc<IngestionPipeline>,
    pub search: Arc<SearchService>,
    pub query: Arc<QueryService>,
    pub completion: Arc<dyn Completion>,
}

/// Single pattern match in place of runtime class/name lookup.
pub async fn dispatch(tool: Tool, deps: &ToolDeps) -> Result<Value> {
    match tool {
        Tool::FileImport(input) => file_import(deps, input).await.and_then(to_json),
        Tool::ExtractText(input) => extract_text_tool(input).await.and_then(to_json),
        Tool::Query(input) => query_tool(deps, input).await.and_then(to_json),
        Tool::Search(input) => search_tool(deps, input).await.and_then(to_json),
        Tool::DateExtract(input) => date_extract_tool(deps, input).await.and_then(to_json),
        Tool::Ollama(input) => ollama_tool(deps, input).await.and_then(to_json),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ArchiveError::Internal(e.into()))
}

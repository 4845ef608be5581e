//! Archive (wires C1–C15): the process-wide dependency graph, built once at
//! startup and handed out as `Arc` clones — the "explicit injection struct"
//! §9's design note calls for in place of module globals.
//!
//! Replaces the teacher's `app_state.rs` (a `Mutex<Status>` plus a bare
//! `neo4j::Graph` handle). Construction order mirrors the teacher's
//! `main.rs` (connect → ensure schema → serve): connect the stores first, run
//! the BM25 reconcile sweep, then build the services layered on top.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::bm25::Bm25Index;
use crate::chunk::{ChunkStore, RedisChunkStore};
use crate::config::AppConfig;
use crate::enrichment::EnrichmentWorker;
use crate::error::Result;
use crate::ingestion::IngestionPipeline;
use crate::llm::{Completion, RigCompletion};
use crate::progress::ProgressTracker;
use crate::query::QueryService;
use crate::queue::WorkQueue;
use crate::search::SearchService;
use crate::tools::ToolDeps;
use crate::tracker::{RedisTracker, Tracker};
use crate::vault::Vault;
use crate::vector_store::{Embedder, QdrantVectorStore, RigEmbedder, VectorStore};
use crate::watcher::FolderWatcher;

pub struct Archive {
    pub vault: Arc<Vault>,
    pub tracker: Arc<dyn Tracker>,
    pub bm25: Arc<Bm25Index>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn Completion>,
    pub queue: Arc<WorkQueue>,
    pub progress: Arc<ProgressTracker>,
    pub activity: Arc<ActivityLog>,
    pub ingestion: Arc<IngestionPipeline>,
    pub search: Arc<SearchService>,
    pub query: Arc<QueryService>,
    pub watcher: Arc<FolderWatcher>,
}

impl Archive {
    pub async fn bootstrap(config: &AppConfig) -> Result<Self> {
        let vault = Arc::new(Vault::new(&config.vault_path));
        vault.initialize().await?;

        let tracker: Arc<dyn Tracker> = Arc::new(RedisTracker::connect(&config.redis_url).await?);

        let bm25 = Arc::new(Bm25Index::new(&config.redis_url, false));
        bm25.load().await?;
        reconcile_bm25_orphans(&bm25, &tracker).await;

        let chunk_store: Arc<dyn ChunkStore> = Arc::new(RedisChunkStore::connect(&config.redis_url).await?);

        let vector_store = QdrantVectorStore::new(config.qdrant_url.clone(), "archive_chunks");
        vector_store.ensure_collection(config.embedding_dim).await?;
        let vector_store: Arc<dyn VectorStore> = Arc::new(vector_store);

        let embedder: Arc<dyn Embedder> = Arc::new(RigEmbedder::new(config.embedding_model.clone()));
        let completion: Arc<dyn Completion> = Arc::new(RigCompletion::new(config.llm_model.clone()));

        let queue = Arc::new(WorkQueue::connect(&config.redis_url).await?);
        let progress = Arc::new(ProgressTracker::connect(&config.redis_url).await?);
        let activity = Arc::new(ActivityLog::connect(&config.redis_url).await?);

        let ingestion = Arc::new(IngestionPipeline::new(
            vault.clone(),
            tracker.clone(),
            bm25.clone(),
            chunk_store.clone(),
            vector_store.clone(),
            embedder.clone(),
            queue.clone(),
            progress.clone(),
            config.auto_tagging_enabled,
        ));

        let search = Arc::new(SearchService::new(
            tracker.clone(),
            bm25.clone(),
            chunk_store.clone(),
            vector_store.clone(),
            embedder.clone(),
        ));
        let query = Arc::new(QueryService::new(search.clone(), completion.clone()));

        let watcher = FolderWatcher::new(
            &config.redis_url,
            vault.clone(),
            ingestion.clone(),
            activity.clone(),
            config.ingestion_concurrency,
            config.debounce_seconds,
            config.max_folders,
        )
        .await?;
        watcher.initialize().await?;

        info!("archive bootstrap complete");
        Ok(Self {
            vault,
            tracker,
            bm25,
            chunk_store,
            vector_store,
            embedder,
            completion,
            queue,
            progress,
            activity,
            ingestion,
            search,
            query,
            watcher,
        })
    }

    /// Builds a fresh enrichment worker over this archive's shared queue and
    /// tracker, for callers embedding the worker in-process instead of
    /// running `lifearch-enrichment-worker` as a separate binary.
    pub fn enrichment_worker(&self, date_extraction_timeout: std::time::Duration) -> EnrichmentWorker {
        EnrichmentWorker::new(
            self.queue.clone(),
            self.tracker.clone(),
            self.completion.clone(),
            date_extraction_timeout,
        )
    }

    pub fn tool_deps(&self) -> ToolDeps {
        ToolDeps {
            ingestion: self.ingestion.clone(),
            search: self.search.clone(),
            query: self.query.clone(),
            completion: self.completion.clone(),
        }
    }
}

/// Open Question (§9): rather than silently tolerating BM25 rows with no
/// tracker counterpart after a crash, drop them on startup.
async fn reconcile_bm25_orphans(bm25: &Bm25Index, tracker: &Arc<dyn Tracker>) {
    let known: HashSet<String> = match tracker.all_ids().await {
        Ok(ids) => ids.into_iter().collect(),
        Err(err) => {
            warn!(error = %err, "skipping BM25 reconcile: could not list tracker ids");
            return;
        }
    };
    match bm25.reconcile(&known).await {
        Ok(removed) if removed > 0 => info!(removed, "BM25 reconcile removed orphaned rows"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "BM25 reconcile failed"),
    }
}

//! Standalone enrichment worker process (C15, §4.12). Wraps
//! `EnrichmentWorker::run_until_shutdown` in a restart supervisor and wires
//! up SIGINT/SIGTERM so an orchestrator's graceful-stop signal finishes the
//! in-flight task before exiting.
//!
//! Grounded on the teacher's `main.rs` for the connect-log-serve shape and on
//! `config.rs`'s `AppConfig::from_env` for startup configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lifearch_core::config::AppConfig;
use lifearch_core::enrichment::EnrichmentWorker;
use lifearch_core::llm::RigCompletion;
use lifearch_core::logging;
use lifearch_core::queue::WorkQueue;
use lifearch_core::tracker::{RedisTracker, Tracker};

const MAX_RESTARTS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let config = AppConfig::from_env()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(shutdown.clone());

    let mut restart_count = 0u32;
    loop {
        let queue = Arc::new(WorkQueue::connect(&config.redis_url).await?);
        let tracker: Arc<dyn Tracker> = Arc::new(RedisTracker::connect(&config.redis_url).await?);
        let completion = Arc::new(RigCompletion::new(config.llm_model.clone()));
        let worker = EnrichmentWorker::new(queue, tracker, completion, config.date_extraction_timeout);

        tracing::info!(restart_count, "enrichment worker starting");
        let outcome = worker.run_until_shutdown(shutdown.clone()).await;

        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("enrichment worker shut down cleanly");
            return Ok(());
        }

        if let Err(err) = outcome {
            tracing::error!(error = %err, "enrichment worker loop exited with an error");
        } else {
            tracing::warn!("enrichment worker loop exited unexpectedly without a shutdown request");
        }

        if restart_count >= MAX_RESTARTS {
            tracing::error!(MAX_RESTARTS, "enrichment worker exceeded max restarts, giving up");
            anyhow::bail!("enrichment worker exceeded {MAX_RESTARTS} restarts");
        }
        restart_count += 1;
        let backoff = Duration::from_secs(5 * restart_count as u64);
        tracing::warn!(restart_count, backoff_secs = backoff.as_secs(), "restarting after backoff");
        tokio::time::sleep(backoff).await;
    }
}

fn spawn_signal_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.store(true, Ordering::Relaxed);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("shutdown signal received, finishing current task before exit");
        shutdown.store(true, Ordering::Relaxed);
    });
}

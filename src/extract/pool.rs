//! Loop stage: extract every document of a data directory
//!
//! A fixed pool of tokio tasks pulls document keys from a shared job queue.
//! Parsing is CPU-bound, so each job runs on the blocking pool. Results flow
//! back over a channel to a single collector, which owns the manifest and
//! writes it once every worker has finished.

use crate::extract::Extractor;
use crate::output::{to_json_bytes, write_bytes, write_json, LoopManifest, OutputLayout};
use crate::stats::{DocumentKey, StatsError, StatsResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Options for one loop run
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Number of concurrent extraction workers
    pub workers: usize,
    /// Fail the run when more documents than this fail extraction
    pub max_failures: Option<usize>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_failures: None,
        }
    }
}

/// Outcome of a completed loop run
#[derive(Debug, Clone, Default)]
pub struct LoopSummary {
    pub run_id: String,
    pub documents: usize,
    pub extracted: usize,
    pub failed: usize,
    /// Publisher → number of failed documents
    pub failures_by_publisher: BTreeMap<String, usize>,
}

enum DocumentOutcome {
    /// Record written, with the CRC32 of its bytes
    Extracted(u32),
    /// Document-local failure
    Failed(String),
}

struct JobResult {
    key: DocumentKey,
    outcome: StatsResult<DocumentOutcome>,
}

/// List every source document, sorted by (publisher, filename)
///
/// Publishers are the sub-directories of `data_dir`. Hidden entries are
/// ignored.
pub fn discover_documents(data_dir: &Path) -> StatsResult<Vec<DocumentKey>> {
    let mut keys = Vec::new();

    for publisher in std::fs::read_dir(data_dir)? {
        let publisher = publisher?;
        let publisher_name = publisher.file_name().to_string_lossy().to_string();
        if publisher_name.starts_with('.') || !publisher.file_type()?.is_dir() {
            continue;
        }

        for file in std::fs::read_dir(publisher.path())? {
            let file = file?;
            let filename = file.file_name().to_string_lossy().to_string();
            if filename.starts_with('.') || !file.file_type()?.is_file() {
                continue;
            }
            keys.push(DocumentKey::new(publisher_name.clone(), filename));
        }
    }

    keys.sort();
    Ok(keys)
}

/// Run the loop stage
///
/// Per-document failures are recorded in the manifest and never stop the
/// run. Failure to write an output is fatal: the manifest is then not
/// written and the stage reports an incomplete run.
pub async fn run_loop(
    extractor: Arc<Extractor>,
    data_dir: &Path,
    layout: &OutputLayout,
    options: &LoopOptions,
) -> StatsResult<LoopSummary> {
    let documents = discover_documents(data_dir)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let workers = options.workers.max(1);

    tracing::info!(
        run_id = %run_id,
        documents = documents.len(),
        workers,
        data_dir = ?data_dir,
        "Starting loop run"
    );

    // Outputs of an earlier run must not survive into this one
    let loop_dir = layout.loop_dir();
    if loop_dir.exists() {
        std::fs::remove_dir_all(&loop_dir)?;
    }
    std::fs::create_dir_all(&loop_dir)?;

    let total = documents.len();
    let (job_tx, job_rx) = mpsc::channel::<DocumentKey>(workers * 2);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<JobResult>(workers * 2);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let extractor = Arc::clone(&extractor);
        let data_dir = data_dir.to_path_buf();
        let layout = layout.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let next = { job_rx.lock().await.recv().await };
                let key = match next {
                    Some(key) => key,
                    None => break,
                };

                let job_key = key.clone();
                let extractor = Arc::clone(&extractor);
                let data_dir = data_dir.clone();
                let layout = layout.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    extract_one(&extractor, &data_dir, &layout, &job_key)
                })
                .await
                .unwrap_or_else(|e| Ok(DocumentOutcome::Failed(format!("worker panicked: {}", e))));

                if result_tx.send(JobResult { key, outcome }).await.is_err() {
                    break;
                }
            }
            tracing::trace!(worker_id, "Worker finished");
        }));
    }
    // Workers hold the only receivers, so the feeder stops once they exit
    drop(job_rx);
    drop(result_tx);

    let feeder = tokio::spawn(async move {
        for key in documents {
            if job_tx.send(key).await.is_err() {
                break;
            }
        }
    });

    let mut manifest = LoopManifest::new(run_id.clone());
    let mut summary = LoopSummary {
        run_id: run_id.clone(),
        documents: total,
        ..Default::default()
    };
    let mut fatal = None;

    while let Some(JobResult { key, outcome }) = result_rx.recv().await {
        match outcome {
            Ok(DocumentOutcome::Extracted(checksum)) => {
                manifest.record_success(&key, checksum);
                summary.extracted += 1;
            }
            Ok(DocumentOutcome::Failed(reason)) => {
                tracing::warn!(document = %key, reason = %reason, "Extraction failed");
                manifest.record_failure(&key, reason);
                summary.failed += 1;
                *summary
                    .failures_by_publisher
                    .entry(key.publisher.clone())
                    .or_insert(0) += 1;
            }
            Err(e) => {
                tracing::error!(document = %key, error = %e, "Fatal error, aborting loop run");
                fatal = Some(e);
                break;
            }
        }
    }
    drop(result_rx);

    if fatal.is_some() {
        feeder.abort();
    }
    let _ = feeder.await;
    for handle in handles {
        let _ = handle.await;
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    manifest.completed_at = chrono::Utc::now();
    write_json(&layout.manifest_path(), &manifest)?;

    tracing::info!(
        run_id = %run_id,
        extracted = summary.extracted,
        failed = summary.failed,
        "Loop run complete"
    );

    if let Some(threshold) = options.max_failures {
        if summary.failed > threshold {
            return Err(StatsError::FailureThreshold {
                failed: summary.failed,
                threshold,
            });
        }
    }

    Ok(summary)
}

/// Extract one document and write its record
fn extract_one(
    extractor: &Extractor,
    data_dir: &Path,
    layout: &OutputLayout,
    key: &DocumentKey,
) -> StatsResult<DocumentOutcome> {
    let source: PathBuf = data_dir.join(&key.publisher).join(&key.filename);
    let bytes = match std::fs::read(&source) {
        Ok(bytes) => bytes,
        Err(e) => return Ok(DocumentOutcome::Failed(format!("read failed: {}", e))),
    };

    match extractor.extract(key, &bytes) {
        Ok(record) => {
            let content = to_json_bytes(&record)?;
            write_bytes(&layout.record_path(key), &content)?;
            Ok(DocumentOutcome::Extracted(crc32fast::hash(&content)))
        }
        Err(e) if e.is_document_local() => Ok(DocumentOutcome::Failed(e.to_string())),
        Err(e) => Err(e),
    }
}

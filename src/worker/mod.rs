//! Single-consumer FIFO job queue for ingest work, so `/ingest/*` handlers
//! can return immediately while the actual pipeline run happens in the
//! background. Grounded on
//! `examples/original_source/src/raggify/server/background_worker.py`'s
//! `BackgroundWorker`/`Job`/`JobPayload`/`_worker_loop`/`_dispatch`, with two
//! differences the status set requires: a `CANCELED` terminal state (the
//! original only has PENDING/RUNNING/SUCCEEDED/FAILED and cancels by hard
//! `Task.cancel()`, losing the distinction between "never ran" and "ran and
//! was stopped"), and a monotonic `u64` id in place of a `uuid4` string,
//! since nothing here needs global uniqueness across processes.

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{self, PipelineReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

/// What to ingest and how. The `*List` variants carry the path to a
/// newline-delimited list file, resolved by the worker at dispatch time --
/// matching `aingest_path_list`/`aingest_url_list`'s `_read_list` fallback
/// for the `str` case of their `str | Sequence[str]` parameter.
#[derive(Debug, Clone)]
pub enum JobKind {
    IngestPath(String),
    IngestPathList(String),
    IngestUrl(String),
    IngestUrlList(String),
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::IngestPath(_) => "ingest_path",
            JobKind::IngestPathList(_) => "ingest_path_list",
            JobKind::IngestUrl(_) => "ingest_url",
            JobKind::IngestUrlList(_) => "ingest_url_list",
        }
    }
}

struct JobRecord {
    id: u64,
    kind: JobKind,
    config_snapshot: Arc<Config>,
    status: JobStatus,
    message: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancel_flag: Arc<AtomicBool>,
}

/// Immutable view of a job returned to callers. `/job` handlers serialize
/// this directly.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: u64,
    pub kind: String,
    pub status: JobStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSnapshot {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind.label().to_string(),
            status: record.status,
            message: record.message.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Reads a newline-delimited list of paths/URLs, skipping blank lines.
/// Mirrors `_read_list`'s tolerant behavior: an unreadable file yields an
/// empty list rather than failing the job outright -- the caller still sees
/// 0 nodes written, which is diagnosable from the job's `SUCCEEDED` state
/// and the ingest report logged alongside it.
fn read_source_list(path: &str) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            log::warn!("worker: failed to read source list {path}: {e}");
            Vec::new()
        }
    }
}

async fn run_job(kind: &JobKind, config: &Config, cancel_flag: &Arc<AtomicBool>) -> Result<PipelineReport> {
    let rt = crate::runtime::get().await?;
    let cancel_flag = cancel_flag.clone();
    let is_canceled = move || cancel_flag.load(Ordering::SeqCst);

    match kind {
        JobKind::IngestPath(path) => {
            pipeline::ingest_source(&rt.db, &rt.embed, path, config, &is_canceled).await
        }
        JobKind::IngestUrl(url) => {
            pipeline::ingest_source(&rt.db, &rt.embed, url, config, &is_canceled).await
        }
        JobKind::IngestPathList(list_path) | JobKind::IngestUrlList(list_path) => {
            let sources = read_source_list(list_path);
            let mut aggregate = PipelineReport::default();
            for source in sources {
                if is_canceled() {
                    aggregate.canceled = true;
                    break;
                }
                let report = pipeline::ingest_source(&rt.db, &rt.embed, &source, config, &is_canceled).await?;
                aggregate.nodes_written += report.nodes_written;
                if report.canceled {
                    aggregate.canceled = true;
                    break;
                }
            }
            Ok(aggregate)
        }
    }
}

/// FIFO ingest worker: one task drains job ids from an unbounded channel and
/// dispatches them one at a time, so ingest throughput is bounded by the
/// pipeline itself rather than by concurrent worker contention.
pub struct Worker {
    sender: mpsc::UnboundedSender<u64>,
    jobs: Arc<Mutex<HashMap<u64, JobRecord>>>,
    next_id: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn start() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Arc::new(Self {
            sender,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            handle: Mutex::new(None),
        });
        worker.clone().spawn_loop(receiver);
        worker
    }

    fn spawn_loop(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<u64>) {
        let worker = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(id) = receiver.recv().await {
                worker.dispatch(id).await;
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Enqueues a job and returns immediately; the pipeline run happens on
    /// the worker task. `config_snapshot` is the config active at submit
    /// time, so a later `/reload` can't change the parameters an
    /// already-queued job runs with.
    pub fn submit(&self, kind: JobKind, config_snapshot: Arc<Config>) -> JobSnapshot {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = JobRecord {
            id,
            kind,
            config_snapshot,
            status: JobStatus::Pending,
            message: String::new(),
            created_at: now,
            updated_at: now,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        };
        let snapshot = JobSnapshot::from(&record);
        self.jobs.lock().unwrap().insert(id, record);
        // Unbounded channel: send only fails if the receiver (the worker
        // task) is gone, which only happens after shutdown().
        let _ = self.sender.send(id);
        snapshot
    }

    pub fn get_job(&self, id: u64) -> Option<JobSnapshot> {
        self.jobs.lock().unwrap().get(&id).map(JobSnapshot::from)
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.lock().unwrap().values().map(JobSnapshot::from).collect()
    }

    /// Removes a job record outright, regardless of status.
    pub fn remove_job(&self, id: u64) -> bool {
        self.jobs.lock().unwrap().remove(&id).is_some()
    }

    /// Drops every job in a terminal state, keeping PENDING/RUNNING.
    pub fn prune_completed(&self) {
        self.jobs
            .lock()
            .unwrap()
            .retain(|_, r| matches!(r.status, JobStatus::Pending | JobStatus::Running));
    }

    /// Sets the per-job cancel flag the pipeline polls at its checkpoints.
    /// Returns `false` if `id` is unknown (already removed, or never existed).
    pub fn cancel(&self, id: u64) -> bool {
        match self.jobs.lock().unwrap().get(&id) {
            Some(record) => {
                record.cancel_flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Aborts the worker task. Any job id still buffered in the channel is
    /// dropped with the receiver and never dispatched; a job already
    /// `RUNNING` is interrupted mid-flight rather than allowed to finish.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn dispatch(&self, id: u64) {
        let (kind, config_snapshot, cancel_flag) = {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(record) = jobs.get_mut(&id) else {
                return;
            };
            record.status = JobStatus::Running;
            record.updated_at = Utc::now();
            (record.kind.clone(), record.config_snapshot.clone(), record.cancel_flag.clone())
        };

        let outcome = run_job(&kind, &config_snapshot, &cancel_flag).await;

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(record) = jobs.get_mut(&id) {
            record.updated_at = Utc::now();
            match outcome {
                Ok(report) if report.canceled => record.status = JobStatus::Canceled,
                Ok(_) => record.status = JobStatus::Succeeded,
                Err(e) => {
                    record.status = JobStatus::Failed;
                    record.message = e.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    static WORKER_TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn test_config() -> Config {
        serde_yaml_ng::from_str("ingest:\n  chunk_size: 200\n  chunk_overlap: 20\n").unwrap()
    }

    #[test]
    fn test_read_source_list_trims_and_skips_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let list_path = temp_dir.path().join("list.txt");
        fs::write(&list_path, "  /a.txt  \n\n/b.txt\n").unwrap();
        let sources = read_source_list(list_path.to_str().unwrap());
        assert_eq!(sources, vec!["/a.txt".to_string(), "/b.txt".to_string()]);
    }

    #[test]
    fn test_read_source_list_missing_file_yields_empty() {
        let sources = read_source_list("/nonexistent/path/does/not/exist.txt");
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_submit_assigns_monotonic_ids_and_pending_status() {
        let worker = Worker::start();
        let cfg = Arc::new(test_config());
        let first = worker.submit(JobKind::IngestPath("/a.txt".into()), cfg.clone());
        let second = worker.submit(JobKind::IngestPath("/b.txt".into()), cfg);
        assert_eq!(second.id, first.id + 1);
        assert_eq!(first.kind, "ingest_path");
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_list_remove_and_prune_job_bookkeeping() {
        let worker = Worker::start();
        let cfg = Arc::new(test_config());
        let job = worker.submit(JobKind::IngestUrl("https://example.com".into()), cfg);

        assert!(worker.get_job(job.id).is_some());
        assert_eq!(worker.list_jobs().len(), 1);

        assert!(worker.remove_job(job.id));
        assert!(worker.get_job(job.id).is_none());
        assert!(!worker.remove_job(job.id));

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_returns_false() {
        let worker = Worker::start();
        assert!(!worker.cancel(999));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_without_text_embed_container_fails_the_job() {
        let _lock = WORKER_TEST_LOCK.lock().unwrap();
        crate::runtime::shutdown().await;

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let upload_dir = temp_dir.path().join("uploads");
        let persist_dir = temp_dir.path().join("pipe_cache");
        let config_yaml = format!(
            r#"
vector_store:
  db_path: "{db}"
ingest_cache:
  persist_dir: "{persist}"
ingest:
  upload_dir: "{upload}"
  chunk_size: 200
  chunk_overlap: 20
"#,
            db = db_path.display(),
            persist = persist_dir.display(),
            upload = upload_dir.display(),
        );
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, &config_yaml).unwrap();
        std::env::set_var("RAGGIFY_CONFIG", config_path.to_str().unwrap());

        let source_path = temp_dir.path().join("source.txt");
        fs::write(&source_path, "hello world").unwrap();

        let rt = crate::runtime::get().await.unwrap();
        let worker = Worker::start();
        let job = worker.submit(
            JobKind::IngestPath(source_path.to_str().unwrap().to_string()),
            rt.config.clone(),
        );

        let mut snapshot = worker.get_job(job.id).unwrap();
        for _ in 0..50 {
            if !matches!(snapshot.status, JobStatus::Pending | JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            snapshot = worker.get_job(job.id).unwrap();
        }

        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.message.contains("embed.text"), "message was: {}", snapshot.message);

        worker.shutdown().await;
        std::env::remove_var("RAGGIFY_CONFIG");
        crate::runtime::shutdown().await;
    }
}

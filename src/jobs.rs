use crate::{
    analysis,
    llm::VisionModel,
    metrics,
    models::ApiError,
    pipeline::{Pipeline, PipelineError},
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobInfo>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    Scrape { search_id: i64 },
    Analyze { result_item_id: i64 },
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Scrape { .. } => "scrape",
            JobKind::Analyze { .. } => "analyze",
        }
    }
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    kind: JobKind,
    attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        attempt: u32,
    },
    Retrying {
        attempt: u32,
        error: String,
        retry_in_secs: u64,
    },
    Completed {
        result: Value,
    },
    Failed {
        error: String,
        stage: Option<String>,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub kind: JobKind,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicies {
    pub scrape: RetryPolicy,
    pub analysis: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            scrape: RetryPolicy {
                max_retries: 3,
                delay: Duration::from_secs(20),
            },
            analysis: RetryPolicy {
                max_retries: 2,
                delay: Duration::from_secs(10),
            },
        }
    }
}

impl RetryPolicies {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scrape: policy_from_env("SCRAPE", defaults.scrape),
            analysis: policy_from_env("ANALYSIS", defaults.analysis),
        }
    }

    fn for_kind(&self, kind: &JobKind) -> RetryPolicy {
        match kind {
            JobKind::Scrape { .. } => self.scrape,
            JobKind::Analyze { .. } => self.analysis,
        }
    }
}

/// Executes one job attempt.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, kind: &JobKind) -> Result<Value, PipelineError>;
}

/// Production runner: scrapes through the pipeline, analyses through the vision model.
#[derive(Clone)]
pub struct Worker {
    pipeline: Pipeline,
    vision: Arc<dyn VisionModel>,
}

impl Worker {
    pub fn new(pipeline: Pipeline, vision: Arc<dyn VisionModel>) -> Self {
        Self { pipeline, vision }
    }
}

#[async_trait]
impl JobRunner for Worker {
    async fn run(&self, kind: &JobKind) -> Result<Value, PipelineError> {
        match *kind {
            JobKind::Scrape { search_id } => {
                let report = self.pipeline.run_scrape(search_id).await?;
                serde_json::to_value(report)
                    .map_err(|err| PipelineError::internal("jobs", err.to_string()))
            }
            JobKind::Analyze { result_item_id } => {
                analysis::run_analysis(self.pipeline.store(), self.vision.as_ref(), result_item_id)
                    .await
            }
        }
    }
}

impl JobQueue {
    pub fn spawn<R: JobRunner>(runner: R, policies: RetryPolicies) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses: Arc<Mutex<HashMap<Uuid, JobInfo>>> = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();
        // Weak so the worker does not keep its own queue alive.
        let retry_tx = tx.downgrade();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_state(&statuses_bg, job.id, JobState::Running { attempt: job.attempt }).await;

                let result = runner.run(&job.kind).await;
                match result {
                    Ok(value) => {
                        info!(target = "scout.jobs", job_id = %job.id, attempt = job.attempt, "job_completed");
                        metrics::job_finished(job.kind.label(), "completed", job.attempt);
                        set_state(&statuses_bg, job.id, JobState::Completed { result: value }).await;
                    }
                    Err(err) => {
                        let policy = policies.for_kind(&job.kind);
                        if err.is_retryable() && job.attempt <= policy.max_retries {
                            warn!(
                                target = "scout.jobs",
                                job_id = %job.id,
                                attempt = job.attempt,
                                error = %err,
                                "job_retry_scheduled"
                            );
                            set_state(
                                &statuses_bg,
                                job.id,
                                JobState::Retrying {
                                    attempt: job.attempt,
                                    error: err.detail().to_string(),
                                    retry_in_secs: policy.delay.as_secs(),
                                },
                            )
                            .await;
                            schedule_retry(retry_tx.clone(), job, policy.delay, statuses_bg.clone());
                        } else {
                            warn!(
                                target = "scout.jobs",
                                job_id = %job.id,
                                attempt = job.attempt,
                                error = %err,
                                "job_failed"
                            );
                            metrics::job_finished(job.kind.label(), "failed", job.attempt);
                            set_state(
                                &statuses_bg,
                                job.id,
                                JobState::Failed {
                                    error: err.detail().to_string(),
                                    stage: Some(err.stage().to_string()),
                                    attempts: job.attempt,
                                },
                            )
                            .await;
                        }
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_scrape(&self, search_id: i64) -> Result<Uuid, ApiError> {
        self.enqueue(JobKind::Scrape { search_id }).await
    }

    pub async fn enqueue_analysis(&self, result_item_id: i64) -> Result<Uuid, ApiError> {
        self.enqueue(JobKind::Analyze { result_item_id }).await
    }

    async fn enqueue(&self, kind: JobKind) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(
                id,
                JobInfo {
                    id: id.to_string(),
                    kind,
                    state: JobState::Queued,
                },
            );
        }
        let job = Job {
            id,
            kind,
            attempt: 1,
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        info!(target = "scout.jobs", job_id = %id, kind = ?kind, "job_enqueued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned()
    }
}

fn schedule_retry(
    tx: mpsc::WeakSender<Job>,
    job: Job,
    delay: Duration,
    statuses: Arc<Mutex<HashMap<Uuid, JobInfo>>>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let id = job.id;
        let attempts = job.attempt;
        let next = Job {
            attempt: job.attempt + 1,
            ..job
        };
        let sent = match tx.upgrade() {
            Some(tx) => tx.send(next).await.is_ok(),
            None => false,
        };
        if !sent {
            set_state(
                &statuses,
                id,
                JobState::Failed {
                    error: "queue closed before retry".into(),
                    stage: None,
                    attempts,
                },
            )
            .await;
        }
    });
}

async fn set_state(statuses: &Mutex<HashMap<Uuid, JobInfo>>, id: Uuid, state: JobState) {
    let mut guard = statuses.lock().await;
    if let Some(info) = guard.get_mut(&id) {
        info.state = state;
    }
}

fn policy_from_env(prefix: &str, fallback: RetryPolicy) -> RetryPolicy {
    let max_retries = std::env::var(format!("{prefix}_MAX_RETRIES"))
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(fallback.max_retries);
    let delay = std::env::var(format!("{prefix}_RETRY_DELAY_SECS"))
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(fallback.delay);
    RetryPolicy { max_retries, delay }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyRunner {
        calls: Arc<AtomicU32>,
        fail_times: u32,
        retryable: bool,
    }

    #[async_trait]
    impl JobRunner for FlakyRunner {
        async fn run(&self, kind: &JobKind) -> Result<Value, PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_times {
                return Err(if self.retryable {
                    PipelineError::upstream("search_products", "no_products")
                } else {
                    PipelineError::not_found("load_search", "search not found")
                });
            }
            Ok(json!({ "kind": kind, "call": call }))
        }
    }

    fn fast_policies(max_retries: u32) -> RetryPolicies {
        let policy = RetryPolicy {
            max_retries,
            delay: Duration::from_millis(10),
        };
        RetryPolicies {
            scrape: policy,
            analysis: policy,
        }
    }

    async fn wait_terminal(queue: &JobQueue, id: Uuid) -> JobInfo {
        for _ in 0..200 {
            if let Some(info) = queue.get(id).await {
                if matches!(info.state, JobState::Completed { .. } | JobState::Failed { .. }) {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = FlakyRunner {
            calls: calls.clone(),
            fail_times: 2,
            retryable: true,
        };
        let (queue, _worker) = JobQueue::spawn(runner, fast_policies(3));
        let id = queue.enqueue_scrape(7).await.unwrap();

        let info = wait_terminal(&queue, id).await;
        match info.state {
            JobState::Completed { result } => assert_eq!(result["call"], 3),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(info.kind, JobKind::Scrape { search_id: 7 });
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = FlakyRunner {
            calls: calls.clone(),
            fail_times: u32::MAX,
            retryable: true,
        };
        let (queue, _worker) = JobQueue::spawn(runner, fast_policies(2));
        let id = queue.enqueue_analysis(3).await.unwrap();

        let info = wait_terminal(&queue, id).await;
        match info.state {
            JobState::Failed { attempts, stage, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(stage.as_deref(), Some("search_products"));
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = FlakyRunner {
            calls: calls.clone(),
            fail_times: 1,
            retryable: false,
        };
        let (queue, _worker) = JobQueue::spawn(runner, fast_policies(3));
        let id = queue.enqueue_scrape(1).await.unwrap();

        let info = wait_terminal(&queue, id).await;
        assert!(matches!(info.state, JobState::Failed { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let runner = FlakyRunner {
            calls: Arc::new(AtomicU32::new(0)),
            fail_times: 0,
            retryable: true,
        };
        let (queue, _worker) = JobQueue::spawn(runner, RetryPolicies::default());
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }

    #[test]
    fn job_info_serializes_flat() {
        let info = JobInfo {
            id: "abc".into(),
            kind: JobKind::Analyze { result_item_id: 4 },
            state: JobState::Retrying {
                attempt: 1,
                error: "HTTP 500".into(),
                retry_in_secs: 10,
            },
        };
        let flat = serde_json::to_value(&info).unwrap();
        assert_eq!(flat["kind"]["type"], "analyze");
        assert_eq!(flat["state"], "retrying");
        assert_eq!(flat["retry_in_secs"], 10);
        assert_eq!(flat["kind"]["result_item_id"], 4);
    }
}

/// Background cron scheduler and retry manager
///
/// Owns one tokio-cron-scheduler `JobScheduler`. Every enabled workflow with a
/// cron expression has one cron job; a failed run may add one-shot retry jobs.
/// Job UUIDs are tracked by key (`cron:<id>`, `retry:<id>:<job>`) so a
/// workflow's jobs can be replaced or removed without restarting the scheduler.

use crate::error::SchedulingError;
use crate::runtime::engine::{ExecutionEngine, RunReport};
use crate::runtime::logger::WorkflowLogger;
use crate::storage::{LogSink, WorkflowStore};
use crate::workflow::types::Workflow;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Which run of a workflow is being attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Cron fire or manual trigger
    Initial,
    /// Automatic retry with `remaining` retries granted when it was scheduled
    Retry { remaining: u32 },
}

/// Retries to grant the next attempt after a failure, `None` to stop
pub fn next_retry(retry_count: u32, attempt: Attempt) -> Option<u32> {
    match attempt {
        Attempt::Initial => (retry_count > 0).then_some(retry_count),
        Attempt::Retry { remaining } => (remaining > 1).then(|| remaining - 1),
    }
}

/// Five-field crontab gets a leading seconds field; longer forms pass through
pub fn normalize_cron(expression: &str) -> String {
    let expression = expression.trim();
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

fn cron_key(workflow_id: &str) -> String {
    format!("cron:{workflow_id}")
}

fn retry_key(workflow_id: &str, job_id: Uuid) -> String {
    format!("retry:{workflow_id}:{job_id}")
}

/// Workflow id of a retry job key
fn retry_owner(key: &str) -> Option<&str> {
    key.strip_prefix("retry:")?
        .rsplit_once(':')
        .map(|(workflow_id, _)| workflow_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub remaining: u32,
    pub delay: Duration,
    pub job_id: Uuid,
}

/// Result of one attempt as seen by the retry manager
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    /// Run failure summary, module or structural
    pub error: Option<String>,
    /// Absent when a structural error aborted the run
    pub report: Option<RunReport>,
    pub retry: Option<ScheduledRetry>,
}

struct SchedulerInner {
    scheduler: RwLock<JobScheduler>,
    jobs: RwLock<HashMap<String, Uuid>>,
    store: Arc<dyn WorkflowStore>,
    engine: Arc<ExecutionEngine>,
    logs: Arc<dyn LogSink>,
}

impl SchedulerInner {
    async fn remove_job(&self, key: &str) {
        let removed = self.jobs.write().await.remove(key);
        if let Some(job_id) = removed {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", key, e);
            } else {
                tracing::debug!("🛑 Removed job from scheduler: {}", key);
            }
        }
    }

    /// Run one attempt and schedule the follow-up retry if one is due
    ///
    /// Boxed so retry jobs can call back into it.
    fn run_attempt(
        self: Arc<Self>,
        workflow_id: String,
        attempt: Attempt,
    ) -> BoxFuture<Result<RunOutcome, SchedulingError>> {
        Box::pin(async move {
            let workflow = self
                .store
                .get(&workflow_id)
                .await?
                .ok_or_else(|| SchedulingError::WorkflowNotFound(workflow_id.clone()))?;
            let log = WorkflowLogger::new(Arc::clone(&self.logs), workflow_id.as_str());
            tracing::info!("🚀 Running workflow {} ({:?})", workflow_id, attempt);

            let (report, error) = match self.engine.execute_workflow(&workflow).await {
                Ok(report) => {
                    let error = report.error.clone();
                    (Some(report), error)
                }
                Err(err) => (None, Some(err.to_string())),
            };
            let summary = match &error {
                None => "success".to_string(),
                Some(error) => format!("failed: {error}"),
            };
            // bookkeeping failures must not cost the workflow its retry
            if let Err(e) = self.store.record_result(&workflow_id, &summary).await {
                log.error(format!("Failed to record run result: {e}"), None).await;
            }

            if error.is_none() {
                match self.logs.clear_warnings(&workflow_id).await {
                    Ok(cleared) => tracing::debug!("🧹 Cleared {} warnings of {}", cleared, workflow_id),
                    Err(e) => tracing::warn!("⚠️ Failed to clear warnings of {}: {}", workflow_id, e),
                }
                return Ok(RunOutcome {
                    success: true,
                    error,
                    report,
                    retry: None,
                });
            }

            let retry = match next_retry(workflow.retry_count, attempt) {
                Some(remaining) => {
                    let delay = workflow.retry_delay();
                    let job_id = Arc::clone(&self)
                        .schedule_retry(&workflow_id, remaining, delay)
                        .await?;
                    log.warning(
                        format!(
                            "Run failed, retrying in {} minute(s) ({} retries left)",
                            delay.as_secs() / 60,
                            remaining
                        ),
                        None,
                    )
                    .await;
                    Some(ScheduledRetry {
                        remaining,
                        delay,
                        job_id,
                    })
                }
                None => {
                    if matches!(attempt, Attempt::Retry { .. }) {
                        log.warning("Run failed, retries exhausted", None).await;
                    }
                    None
                }
            };

            Ok(RunOutcome {
                success: false,
                error,
                report,
                retry,
            })
        })
    }

    /// Run an attempt from a job or a manual trigger, tracing the outcome
    async fn run_logged(self: Arc<Self>, workflow_id: String, attempt: Attempt) {
        match self.run_attempt(workflow_id.clone(), attempt).await {
            Ok(outcome) if outcome.success => {
                tracing::info!("✅ Workflow {} completed", workflow_id)
            }
            Ok(outcome) => tracing::warn!(
                "⚠️ Workflow {} failed: {}",
                workflow_id,
                outcome.error.unwrap_or_default()
            ),
            Err(SchedulingError::WorkflowNotFound(_)) => {
                tracing::debug!("⏭️ Skipping run of deleted workflow: {}", workflow_id)
            }
            Err(e) => tracing::error!("❌ Workflow {} could not run: {}", workflow_id, e),
        }
    }

    async fn schedule_retry(
        self: Arc<Self>,
        workflow_id: &str,
        remaining: u32,
        delay: Duration,
    ) -> Result<Uuid, SchedulingError> {
        let inner = Arc::clone(&self);
        let owner = workflow_id.to_string();
        let job = Job::new_one_shot_async(delay, move |job_id, _l| {
            let inner = Arc::clone(&inner);
            let workflow_id = owner.clone();
            Box::pin(async move {
                inner.jobs.write().await.remove(&retry_key(&workflow_id, job_id));
                tracing::info!("🔁 Retry fired for {} ({} left)", workflow_id, remaining);
                inner.run_logged(workflow_id, Attempt::Retry { remaining }).await;
            })
        })?;

        let job_id = {
            let scheduler = self.scheduler.read().await;
            scheduler.add(job).await?
        };
        self.jobs
            .write()
            .await
            .insert(retry_key(workflow_id, job_id), job_id);
        tracing::debug!("📝 Scheduled retry {} for {} in {:?}", job_id, workflow_id, delay);
        Ok(job_id)
    }
}

/// Cron scheduling, manual triggers and automatic retries for stored workflows
#[derive(Clone)]
pub struct SchedulerService {
    inner: Arc<SchedulerInner>,
}

impl SchedulerService {
    pub async fn new(
        store: Arc<dyn WorkflowStore>,
        engine: Arc<ExecutionEngine>,
        logs: Arc<dyn LogSink>,
    ) -> Result<Self, SchedulingError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                scheduler: RwLock::new(scheduler),
                jobs: RwLock::new(HashMap::new()),
                store,
                engine,
                logs,
            }),
        })
    }

    /// Register every enabled workflow with a cron, then start ticking
    ///
    /// Workflows with an invalid cron are logged and left unscheduled.
    pub async fn start(&self) -> Result<(), SchedulingError> {
        tracing::info!("⏰ Starting scheduler service");
        let workflows = self.inner.store.list().await?;
        let mut scheduled = 0;
        for workflow in &workflows {
            match self.sync_workflow(workflow).await {
                Ok(true) => scheduled += 1,
                Ok(false) => {}
                Err(e) => {
                    let log = WorkflowLogger::new(Arc::clone(&self.inner.logs), workflow.id.as_str());
                    log.error(format!("Workflow '{}' not scheduled: {e}", workflow.name), None)
                        .await;
                }
            }
        }

        self.inner.scheduler.read().await.start().await?;
        tracing::info!(
            "✅ Scheduler started: {} of {} workflows scheduled",
            scheduled,
            workflows.len()
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SchedulingError> {
        tracing::info!("⏹️ Stopping scheduler service");
        self.inner.jobs.write().await.clear();
        self.inner.scheduler.write().await.shutdown().await?;
        tracing::info!("✅ Scheduler stopped");
        Ok(())
    }

    /// Register, replace or remove the cron job of `workflow`
    ///
    /// Returns whether the workflow is scheduled afterwards. Pending retries
    /// are left alone.
    pub async fn sync_workflow(&self, workflow: &Workflow) -> Result<bool, SchedulingError> {
        let key = cron_key(&workflow.id);
        self.inner.remove_job(&key).await;

        let Some(cron) = workflow.active_cron() else {
            tracing::debug!("📋 Workflow {} has no active schedule", workflow.id);
            return Ok(false);
        };
        let expression = normalize_cron(cron);

        let inner = Arc::clone(&self.inner);
        let owner = workflow.id.clone();
        let job = Job::new_async(expression.as_str(), move |_job_id, _l| {
            let inner = Arc::clone(&inner);
            let workflow_id = owner.clone();
            Box::pin(async move {
                tracing::debug!("🔔 Cron fired for workflow {}", workflow_id);
                inner.run_logged(workflow_id, Attempt::Initial).await;
            })
        })
        .map_err(|e| SchedulingError::InvalidCron {
            expression: cron.to_string(),
            reason: e.to_string(),
        })?;

        let job_id = {
            let scheduler = self.inner.scheduler.read().await;
            scheduler.add(job).await?
        };
        self.inner.jobs.write().await.insert(key, job_id);
        tracing::info!("🔥 Scheduled workflow {} ({})", workflow.id, expression);
        Ok(true)
    }

    /// Remove the cron job and every pending retry of a workflow
    pub async fn unschedule(&self, workflow_id: &str) {
        let mut keys = vec![cron_key(workflow_id)];
        keys.extend(
            self.inner
                .jobs
                .read()
                .await
                .keys()
                .filter(|key| retry_owner(key) == Some(workflow_id))
                .cloned(),
        );
        for key in keys {
            self.inner.remove_job(&key).await;
        }
        tracing::info!("🗑️ Unscheduled workflow {}", workflow_id);
    }

    /// Run a workflow now on its own task, independent of its schedule
    pub fn trigger(&self, workflow_id: &str) -> tokio::task::JoinHandle<()> {
        tracing::info!("▶️ Manual trigger for workflow {}", workflow_id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_logged(workflow_id.to_string(), Attempt::Initial))
    }

    /// Run one attempt inline and report its outcome
    pub async fn run_attempt(
        &self,
        workflow_id: &str,
        attempt: Attempt,
    ) -> Result<RunOutcome, SchedulingError> {
        Arc::clone(&self.inner)
            .run_attempt(workflow_id.to_string(), attempt)
            .await
    }

    pub async fn is_scheduled(&self, workflow_id: &str) -> bool {
        self.inner.jobs.read().await.contains_key(&cron_key(workflow_id))
    }

    /// Retry jobs waiting to fire for a workflow
    pub async fn pending_retries(&self, workflow_id: &str) -> usize {
        self.inner
            .jobs
            .read()
            .await
            .keys()
            .filter(|key| retry_owner(key) == Some(workflow_id))
            .count()
    }

    pub async fn next_run_time(&self, workflow_id: &str) -> Option<DateTime<Utc>> {
        let job_id = *self.inner.jobs.read().await.get(&cron_key(workflow_id))?;
        let mut scheduler = self.inner.scheduler.write().await;
        match scheduler.next_tick_for_job(job_id).await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!("⚠️ No next tick for workflow {}: {}", workflow_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::ModuleExecutor;
    use crate::error::StorageError;
    use crate::storage::{LogFilter, LogLevel, MemoryLogSink, MemoryVariableStore, MemoryWorkflowStore};
    use crate::workflow::types::{Connection, Module, ModuleType};
    use async_trait::async_trait;

    struct Fixture {
        service: SchedulerService,
        store: Arc<MemoryWorkflowStore>,
        logs: Arc<MemoryLogSink>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryWorkflowStore::new());
        let logs = Arc::new(MemoryLogSink::new(0));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(ModuleExecutor::new()),
            Arc::new(MemoryVariableStore::new()),
            logs.clone(),
        ));
        let service = SchedulerService::new(store.clone(), engine, logs.clone())
            .await
            .unwrap();
        Fixture {
            service,
            store,
            logs,
        }
    }

    /// Fails every run: no handlers are registered
    fn failing(retry_count: u32) -> Workflow {
        let mut workflow = Workflow::new("flaky");
        workflow.modules = vec![Module::new("m1", ModuleType::Md5, "hash")];
        workflow.retry_count = retry_count;
        workflow.retry_interval = 0;
        workflow
    }

    #[test]
    fn retry_chain_counts_down() {
        assert_eq!(next_retry(2, Attempt::Initial), Some(2));
        assert_eq!(next_retry(2, Attempt::Retry { remaining: 2 }), Some(1));
        assert_eq!(next_retry(2, Attempt::Retry { remaining: 1 }), None);
        assert_eq!(next_retry(0, Attempt::Initial), None);
    }

    #[test]
    fn cron_normalization_and_keys() {
        assert_eq!(normalize_cron(" */5 * * * * "), "0 */5 * * * *");
        assert_eq!(normalize_cron("30 0 9 * * Mon"), "30 0 9 * * Mon");
        let job = Uuid::new_v4();
        assert_eq!(retry_owner(&retry_key("wf:a", job)), Some("wf:a"));
        assert_eq!(retry_owner(&cron_key("wf")), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_runs_schedule_retries_until_exhausted() {
        let fx = fixture().await;
        let workflow = fx.store.save(failing(2)).await.unwrap();
        let id = workflow.id.as_str();

        let first = fx.service.run_attempt(id, Attempt::Initial).await.unwrap();
        assert!(!first.success);
        let retry = first.retry.unwrap();
        assert_eq!(retry.remaining, 2);
        assert_eq!(retry.delay, Duration::from_secs(60));
        assert_eq!(fx.service.pending_retries(id).await, 1);

        let second = fx
            .service
            .run_attempt(id, Attempt::Retry { remaining: 2 })
            .await
            .unwrap();
        assert_eq!(second.retry.map(|r| r.remaining), Some(1));

        let third = fx
            .service
            .run_attempt(id, Attempt::Retry { remaining: 1 })
            .await
            .unwrap();
        assert!(third.retry.is_none());
        let warnings = fx
            .logs
            .list(&LogFilter {
                level: Some(LogLevel::Warning),
                ..LogFilter::for_source(id)
            })
            .await
            .unwrap();
        assert!(warnings.iter().any(|e| e.message.contains("retries exhausted")));

        let stored = fx.store.get(id).await.unwrap().unwrap();
        assert!(stored.last_run.is_some());
        assert_eq!(
            stored.last_result.as_deref(),
            Some("failed: hash: unknown module type: md5")
        );

        assert_eq!(fx.service.pending_retries(id).await, 2);
        fx.service.unschedule(id).await;
        assert_eq!(fx.service.pending_retries(id).await, 0);
    }

    async fn warnings_of(logs: &MemoryLogSink, id: &str) -> Vec<String> {
        logs.list(&LogFilter {
            level: Some(LogLevel::Warning),
            ..LogFilter::for_source(id)
        })
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.message)
        .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_job_fires_as_a_retry_and_drops_its_key() {
        let fx = fixture().await;
        let workflow = fx.store.save(failing(2)).await.unwrap();
        let id = workflow.id.clone();
        fx.service.start().await.unwrap();

        let job_id = Arc::clone(&fx.service.inner)
            .schedule_retry(&id, 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(fx
            .service
            .inner
            .jobs
            .read()
            .await
            .contains_key(&retry_key(&id, job_id)));

        // a last retry that fails schedules nothing and reports exhaustion
        let fired = tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                if warnings_of(&fx.logs, &id)
                    .await
                    .iter()
                    .any(|message| message.contains("retries exhausted"))
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        assert!(fired.is_ok(), "retry job never ran");
        assert_eq!(fx.service.pending_retries(&id).await, 0);
        let stored = fx.store.get(&id).await.unwrap().unwrap();
        assert!(stored.last_result.unwrap().starts_with("failed:"));

        fx.service.stop().await.unwrap();
    }

    /// Reads from memory, refuses every write
    struct ReadOnlyStore(MemoryWorkflowStore);

    #[async_trait]
    impl WorkflowStore for ReadOnlyStore {
        async fn list(&self) -> Result<Vec<Workflow>, StorageError> {
            self.0.list().await
        }

        async fn get(&self, id: &str) -> Result<Option<Workflow>, StorageError> {
            self.0.get(id).await
        }

        async fn save(&self, _workflow: Workflow) -> Result<Workflow, StorageError> {
            Err(StorageError::Corrupt("read-only".into()))
        }

        async fn delete(&self, _id: &str) -> Result<bool, StorageError> {
            Err(StorageError::Corrupt("read-only".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_bookkeeping_still_schedules_the_retry() {
        let memory = MemoryWorkflowStore::new();
        let workflow = memory.save(failing(1)).await.unwrap();
        let logs = Arc::new(MemoryLogSink::new(0));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(ModuleExecutor::new()),
            Arc::new(MemoryVariableStore::new()),
            logs.clone(),
        ));
        let service = SchedulerService::new(Arc::new(ReadOnlyStore(memory)), engine, logs.clone())
            .await
            .unwrap();

        let outcome = service.run_attempt(&workflow.id, Attempt::Initial).await.unwrap();
        assert_eq!(outcome.retry.map(|r| r.remaining), Some(1));
        assert!(logs
            .entries()
            .await
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("Failed to record run result")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn structural_errors_also_drive_retries() {
        let fx = fixture().await;
        let mut workflow = failing(1);
        workflow.connections = vec![Connection::new("m1", "m1")];
        let workflow = fx.store.save(workflow).await.unwrap();

        let outcome = fx.service.run_attempt(&workflow.id, Attempt::Initial).await.unwrap();
        assert!(outcome.report.is_none());
        assert_eq!(outcome.retry.map(|r| r.remaining), Some(1));
        let stored = fx.store.get(&workflow.id).await.unwrap().unwrap();
        assert!(stored.last_result.unwrap().starts_with("failed: cyclic dependency"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_records_result_and_clears_warnings() {
        let fx = fixture().await;
        let workflow = fx.store.save(Workflow::new("empty")).await.unwrap();
        fx.logs
            .append(LogLevel::Warning, &workflow.id, "old failure", None)
            .await
            .unwrap();

        let outcome = fx.service.run_attempt(&workflow.id, Attempt::Initial).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.retry.is_none());
        let stored = fx.store.get(&workflow.id).await.unwrap().unwrap();
        assert_eq!(stored.last_result.as_deref(), Some("success"));
        assert!(fx
            .logs
            .entries()
            .await
            .iter()
            .all(|e| e.level != LogLevel::Warning));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_workflow_is_reported() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service.run_attempt("ghost", Attempt::Initial).await,
            Err(SchedulingError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_follows_enabled_flag_and_rejects_bad_cron() {
        let fx = fixture().await;
        let mut workflow = fx.store.save(Workflow::new("nightly")).await.unwrap();
        workflow.enabled = true;
        workflow.cron = Some("0 3 * * *".into());
        assert!(fx.service.sync_workflow(&workflow).await.unwrap());
        assert!(fx.service.is_scheduled(&workflow.id).await);

        workflow.enabled = false;
        assert!(!fx.service.sync_workflow(&workflow).await.unwrap());
        assert!(!fx.service.is_scheduled(&workflow.id).await);
        assert_eq!(fx.service.next_run_time(&workflow.id).await, None);

        workflow.enabled = true;
        workflow.cron = Some("every tuesday".into());
        assert!(matches!(
            fx.service.sync_workflow(&workflow).await,
            Err(SchedulingError::InvalidCron { .. })
        ));
        assert!(!fx.service.is_scheduled(&workflow.id).await);
    }
}

use scout_core::{PageRequest, Task, TaskId, TaskStatus};
use scout_infra::{
    pipeline::{PipelineError, RetryStage, SubmissionStage},
    store::{TaskPage, TaskStore},
    workers::PoolHandle,
    Runtime, RuntimeError, Settings,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the HTTP handlers need.
///
/// With in-memory stores the worker and delivery stages have nowhere else to
/// run, so they are started inside the API process. With persistent stores
/// they run as separate processes (`scout-worker`, `scout-publisher`).
pub struct AppServices {
    runtime: Runtime,
    submission: SubmissionStage,
    retry: RetryStage,
    cancel: CancellationToken,
    pools: Mutex<Vec<PoolHandle>>,
}

impl AppServices {
    /// Serve HTTP only; no stage consumes the queues from this process.
    pub fn new(runtime: Runtime) -> Self {
        Self {
            submission: runtime.submission(),
            retry: runtime.retry(),
            runtime,
            cancel: CancellationToken::new(),
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Serve HTTP and run the worker and delivery stages in-process.
    pub fn with_in_process_stages(runtime: Runtime) -> Self {
        let mut services = Self::new(runtime);
        let worker = services.runtime.spawn_worker_pool(services.cancel.child_token());
        let delivery = services
            .runtime
            .spawn_delivery_pool(services.cancel.child_token());
        services.pools = Mutex::new(vec![worker, delivery]);
        services
    }

    /// Wire services from settings.
    pub async fn build(settings: Settings) -> Result<Self, RuntimeError> {
        let runtime = Runtime::from_settings(settings).await?;
        if runtime.is_persistent() {
            Ok(Self::new(runtime))
        } else {
            info!("starting worker and delivery stages in-process");
            Ok(Self::with_in_process_stages(runtime))
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub async fn submit(&self, identity: &str, query_text: &str) -> Result<Task, PipelineError> {
        self.submission.submit(identity, query_text).await
    }

    pub async fn retry(&self, id: TaskId) -> Result<Task, PipelineError> {
        self.retry.retry(id).await
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, PipelineError> {
        Ok(self.runtime.store.get(id).await?)
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        page: PageRequest,
    ) -> Result<TaskPage, PipelineError> {
        Ok(self.runtime.store.list(status, page).await?)
    }

    /// Stop in-process stages after their current message and release pools.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let pools = std::mem::take(&mut *self.pools.lock().await);
        for pool in pools {
            pool.shutdown().await;
        }
        self.runtime.close().await;
    }
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

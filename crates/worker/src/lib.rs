//! Stage processes: the worker (raw queue) and the publisher (completed queue).
//!
//! Each binary wires a [`Runtime`] from the environment, runs one consumer
//! pool until ctrl-c, then drains it.

use std::future::Future;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use scout_infra::{workers::PoolHandle, Runtime, Settings};

/// Which consumer pool a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Worker,
    Publisher,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Worker => "worker",
            Stage::Publisher => "publisher",
        }
    }

    fn spawn(&self, runtime: &Runtime, cancel: CancellationToken) -> PoolHandle {
        match self {
            Stage::Worker => runtime.spawn_worker_pool(cancel),
            Stage::Publisher => runtime.spawn_delivery_pool(cancel),
        }
    }
}

/// Run `stage` against the environment's stores until ctrl-c.
pub async fn run(stage: Stage) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    if !settings.use_persistent_stores {
        tracing::warn!(
            stage = stage.as_str(),
            "USE_PERSISTENT_STORES is off; this process shares no queue with the API"
        );
    }

    let runtime = Runtime::from_settings(settings)
        .await
        .context("failed to wire services")?;

    run_until(stage, &runtime, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    runtime.close().await;
    Ok(())
}

/// Run `stage` on `runtime` until `shutdown` resolves, then drain the pool.
pub async fn run_until(stage: Stage, runtime: &Runtime, shutdown: impl Future<Output = ()>) {
    let cancel = CancellationToken::new();
    let pool = stage.spawn(runtime, cancel.child_token());
    info!(stage = stage.as_str(), "stage started");

    shutdown.await;
    info!(stage = stage.as_str(), "shutdown requested");

    cancel.cancel();
    let stats = pool.stats();
    pool.shutdown().await;

    info!(
        stage = stage.as_str(),
        received = stats.received,
        handled = stats.handled,
        failed = stats.failed,
        rejected = stats.rejected,
        uptime_secs = stats.uptime_secs,
        "stage stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use scout_core::TaskStatus;
    use scout_infra::store::TaskStore;

    #[tokio::test]
    async fn worker_stage_processes_until_shutdown() {
        let runtime = Runtime::in_memory(Settings::default()).unwrap();
        let task = runtime.submission().submit("user-1", "tokio").await.unwrap();

        let store = std::sync::Arc::clone(&runtime.store);
        let id = task.id();
        run_until(Stage::Worker, &runtime, async move {
            for _ in 0..200 {
                let current = store.get(id).await.unwrap().unwrap();
                if current.status() == TaskStatus::Done {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            panic!("task never finished");
        })
        .await;

        let done = runtime.store.get(id).await.unwrap().unwrap();
        assert_eq!(done.status(), TaskStatus::Done);
        assert!(done.full_result().is_some());
    }
}

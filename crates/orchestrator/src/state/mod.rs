mod registry;

pub use registry::BuildRegistry;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use log::info;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

const BUILD_DIR_ROOT: &str = "/tmp";

/// The single source of truth for one build's liveness: coarse progress for
/// the UI, cooperative cancellation, sticky error aggregation, a scratchpad
/// for worker handoffs, and cleanup deferred to the end of the build.
pub struct BuildState {
    pub build_id: String,
    inner: Mutex<Inner>,
    done: Notify,
}

struct Inner {
    stage: String,
    steps_total: u64,
    steps_done: u64,
    error: Option<String>,
    stopped: bool,
    finished: bool,
    kv: HashMap<String, Value>,
    deferred: Vec<BoxFuture<'static, ()>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuildProgress {
    pub stage: String,
    pub steps_done: u64,
    pub steps_total: u64,
    pub error: Option<String>,
    pub finished: bool,
}

impl BuildState {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            inner: Mutex::new(Inner {
                stage: String::new(),
                steps_total: 0,
                steps_done: 0,
                error: None,
                stopped: false,
                finished: false,
                kv: HashMap::new(),
                deferred: Vec::new(),
            }),
            done: Notify::new(),
        }
    }

    pub async fn set_build_stage(&self, stage: &str) {
        info!("build {}: {}", self.build_id, stage);
        self.inner.lock().await.stage = stage.to_string();
    }

    pub async fn set_build_steps(&self, steps: u64) {
        let mut inner = self.inner.lock().await;
        inner.steps_total = steps;
        inner.steps_done = 0;
    }

    pub async fn increment_build_progress(&self) {
        let mut inner = self.inner.lock().await;
        if inner.steps_done < inner.steps_total {
            inner.steps_done += 1;
        }
    }

    /// Records the build's error and flags it as stopped. The first reported
    /// error sticks; later reports are dropped. Errors are never cleared.
    pub async fn report_error<E: std::fmt::Display>(&self, err: E) {
        let mut inner = self.inner.lock().await;
        if inner.error.is_none() {
            inner.error = Some(err.to_string());
        }
        inner.stopped = true;
        drop(inner);
        self.done.notify_waiters();
    }

    /// True once the build should no longer launch remote work. Workers poll
    /// this between operations; nothing in flight is interrupted.
    pub async fn stop(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.stopped || inner.error.is_some()
    }

    pub async fn get_error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn sticky_error(&self) -> anyhow::Error {
        match self.get_error().await {
            Some(msg) => anyhow!(msg),
            None => anyhow!("build {} was stopped", self.build_id),
        }
    }

    /// The aggregate outcome of the build so far.
    pub async fn result(&self) -> Result<()> {
        match self.get_error().await {
            Some(msg) => Err(anyhow!(msg)),
            None => Ok(()),
        }
    }

    /// Registers cleanup to run when the build completes, successfully or
    /// not. Cleanups run serially in LIFO order.
    pub async fn defer<F>(&self, cleanup: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.lock().await.deferred.push(Box::pin(cleanup));
    }

    /// Marks the build complete, runs the deferred cleanups (LIFO, outside
    /// the lock) and releases everything blocked on [`wait_done`].
    ///
    /// [`wait_done`]: BuildState::wait_done
    pub async fn done_building(&self) {
        let cleanups = {
            let mut inner = self.inner.lock().await;
            if inner.finished {
                return;
            }
            inner.finished = true;
            std::mem::take(&mut inner.deferred)
        };
        for cleanup in cleanups.into_iter().rev() {
            cleanup.await;
        }
        self.done.notify_waiters();
    }

    pub async fn is_finished(&self) -> bool {
        self.inner.lock().await.finished
    }

    #[cfg(test)]
    pub(crate) async fn deferred_count(&self) -> usize {
        self.inner.lock().await.deferred.len()
    }

    pub async fn wait_done(&self) {
        loop {
            let notified = self.done.notified();
            if self.inner.lock().await.finished {
                return;
            }
            notified.await;
        }
    }

    pub async fn set(&self, key: &str, value: Value) {
        self.inner.lock().await.kv.insert(key.to_string(), value);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.kv.get(key).cloned()
    }

    /// The controller-side working directory of this build.
    pub fn build_dir(&self) -> PathBuf {
        PathBuf::from(BUILD_DIR_ROOT).join(&self.build_id)
    }

    /// Stages bytes under the build working dir for a later `scp`.
    pub async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let dir = self.build_dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), data).await?;
        Ok(())
    }

    pub async fn progress(&self) -> BuildProgress {
        let inner = self.inner.lock().await;
        BuildProgress {
            stage: inner.stage.clone(),
            steps_done: inner.steps_done,
            steps_total: inner.steps_total,
            error: inner.error.clone(),
            finished: inner.finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_report_error_is_sticky() {
        let bs = BuildState::new("b1");
        assert!(!bs.stop().await);
        assert!(bs.result().await.is_ok());

        bs.report_error(anyhow!("init failed")).await;
        assert!(bs.stop().await);
        assert_eq!(bs.get_error().await.unwrap(), "init failed");

        // later reports never replace or clear the first error
        bs.report_error(anyhow!("start failed")).await;
        assert!(bs.stop().await);
        assert_eq!(bs.get_error().await.unwrap(), "init failed");
        assert_eq!(bs.result().await.unwrap_err().to_string(), "init failed");
    }

    #[tokio::test]
    async fn test_deferred_cleanups_run_lifo_exactly_once() {
        let bs = BuildState::new("b2");
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bs.defer(async move {
                order.lock().await.push(tag);
            })
            .await;
        }

        bs.done_building().await;
        assert_eq!(*order.lock().await, vec!["third", "second", "first"]);

        // done_building is idempotent; cleanups never run twice
        bs.done_building().await;
        assert_eq!(order.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_done_building_releases_waiters() {
        let bs = Arc::new(BuildState::new("b3"));
        let waiter = {
            let bs = bs.clone();
            tokio::spawn(async move { bs.wait_done().await })
        };
        bs.done_building().await;
        waiter.await.unwrap();
        assert!(bs.is_finished().await);
    }

    #[tokio::test]
    async fn test_progress_never_exceeds_total() {
        let bs = BuildState::new("b4");
        bs.set_build_steps(2).await;
        bs.set_build_stage("Initializing the nodes").await;
        for _ in 0..5 {
            bs.increment_build_progress().await;
        }
        let progress = bs.progress().await;
        assert_eq!(progress.steps_done, 2);
        assert_eq!(progress.steps_total, 2);
        assert_eq!(progress.stage, "Initializing the nodes");
    }

    #[tokio::test]
    async fn test_scratchpad_round_trip() {
        let bs = BuildState::new("b5");
        bs.set("0", serde_json::json!({"cmdline": "run"})).await;
        assert_eq!(
            bs.get("0").await.unwrap(),
            serde_json::json!({"cmdline": "run"})
        );
        assert!(bs.get("1").await.is_none());
    }

    #[tokio::test]
    async fn test_write_stages_bytes_under_build_dir() {
        let build_id = format!("state-test-{}", uuid::Uuid::new_v4().simple());
        let bs = BuildState::new(build_id.clone());
        bs.write("genesis.json", b"{}").await.unwrap();

        let path = bs.build_dir().join("genesis.json");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"{}");
        tokio::fs::remove_dir_all(bs.build_dir()).await.unwrap();
    }
}

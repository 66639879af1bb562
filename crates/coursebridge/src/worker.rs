//! Worker pool
//!
//! N OS threads attached to one task queue. Each worker owns its own cache
//! handle and adapter clients, so workers share nothing in memory; they
//! coordinate only through the queue and the staleness database. A worker
//! exits on its poison pill, or when the queue closes. A failed task is
//! logged and the worker moves on; the task is not redelivered.

use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::lms::{LmsApi, LmsClient};
use crate::queue::TaskQueue;
use crate::registry::{RegistryApi, RegistryClient};
use crate::storage::SyncCache;
use crate::sync;
use crate::task::SyncTask;

/// A set of worker threads draining one queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers named `{name}-{index}` on `queue`.
    pub fn start(
        name: &str,
        count: usize,
        queue: &TaskQueue,
        config: &BridgeConfig,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let queue = queue.clone();
            let config = config.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || run_worker(index, queue, config))?;
            handles.push(handle);
        }
        info!(pool = name, workers = count, "worker pool started");
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// True once every worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|handle| handle.is_finished())
    }

    /// Wait for every worker to exit. Workers only exit on their poison pill
    /// (or a closed queue), so the caller must have enqueued the pills first.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

fn run_worker(index: usize, queue: TaskQueue, config: BridgeConfig) {
    let mut cache = match SyncCache::open(&config) {
        Ok(cache) => cache,
        Err(e) => {
            error!(worker = index, error = %e, "cache open failed, worker not starting");
            return;
        }
    };
    let registry = match RegistryClient::new(config.registry.clone()) {
        Ok(registry) => registry,
        Err(e) => {
            error!(worker = index, error = %e, "registry client failed, worker not starting");
            return;
        }
    };
    let lms = match LmsClient::new(config.lms.clone()) {
        Ok(lms) => lms,
        Err(e) => {
            error!(worker = index, error = %e, "LMS client failed, worker not starting");
            return;
        }
    };
    debug!(worker = index, "worker ready");
    worker_loop(index, &queue, &mut cache, &registry, &lms, &config);
}

fn worker_loop(
    index: usize,
    queue: &TaskQueue,
    cache: &mut SyncCache,
    registry: &dyn RegistryApi,
    lms: &dyn LmsApi,
    config: &BridgeConfig,
) {
    while let Some(task) = queue.dequeue() {
        debug!(worker = index, task = %task, "task received");
        let result = match &task {
            SyncTask::UserSync { external_id } => {
                sync::sync_user(cache, registry, lms, config, *external_id)
            }
            SyncTask::CourseSync {
                course_id,
                group_ids,
            } => sync::sync_course(registry, lms, config, course_id, group_ids),
            SyncTask::FullSyncStart => {
                sync::full_sync_fan_out(cache, registry, queue, config.full_sync_workers())
            }
            SyncTask::FullSyncDone => cache.mark_full_sync_started(),
            SyncTask::Terminate => {
                debug!(worker = index, "terminate received, worker exiting");
                return;
            }
        };
        if let Err(e) = result {
            warn!(worker = index, task = %task, error = %e, "task failed");
        }
    }
    debug!(worker = index, "queue closed, worker exiting");
}

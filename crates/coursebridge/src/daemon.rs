//! Daemon supervisor
//!
//! One invocation runs Starting -> Running -> Draining -> Stopped. Starting
//! pre-warms the group-to-course map, binds the trigger socket, and spawns
//! the interactive pool. Running polls in short ticks until the end-of-run
//! deadline, launching at most one full-sync sub-run when the configured
//! hour arrives and the rate limit allows. Draining stops the receiver with
//! the empty trigger payload, poisons the workers, joins everything, and
//! discards whatever is left on the queues.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Timelike;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::receiver::{send_trigger, TriggerReceiver};
use crate::registry::RegistryClient;
use crate::storage::SyncCache;
use crate::task::SyncTask;
use crate::worker::WorkerPool;

const TICK: Duration = Duration::from_millis(500);
/// Upper bound on tasks pulled back out of a queue during the final drain.
const DRAIN_LIMIT: usize = 10_000;

/// A full-sync sub-run: its own queue and dedicated worker set. The fan-out
/// enqueues the worker set's poison pills, so the pool terminates on its own
/// once the course tasks are consumed.
struct FullSyncRun {
    queue: TaskQueue,
    pool: WorkerPool,
}

/// Process supervisor for one time-boxed daemon invocation.
pub struct Daemon {
    config: BridgeConfig,
}

impl Daemon {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Run the daemon through its full lifecycle. Returns the error that
    /// aborted the Running phase, if any, after draining.
    pub fn run(&self) -> Result<()> {
        info!(state = "starting");
        let shutdown = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;

        ensure_parent_dir(&self.config.cache_db_path)?;
        ensure_parent_dir(&self.config.socket_path)?;

        let mut cache = SyncCache::open(&self.config)?;
        let registry = RegistryClient::new(self.config.registry.clone())?;
        // pre-warm so the first trigger does not pay the rebuild latency
        cache.panel_source_map(&registry)?;

        let interactive = TaskQueue::new();
        let receiver = with_signals_blocked(|| {
            TriggerReceiver::start(&self.config.socket_path, interactive.clone())
        })?;
        let pool = with_signals_blocked(|| {
            WorkerPool::start(
                "worker",
                self.config.daemon.workers,
                &interactive,
                &self.config,
            )
        })?;
        let deadline = Instant::now() + self.config.run_duration();

        let mut full_sync: Option<FullSyncRun> = None;
        let run_result = self.run_loop(&mut cache, &shutdown, deadline, &mut full_sync);
        if let Err(e) = &run_result {
            error!(error = %e, "fatal error while running, draining");
        }

        info!(state = "draining");
        if let Err(e) = send_trigger(&self.config.socket_path, "") {
            warn!(error = %e, "could not signal receiver to stop");
        }
        for _ in 0..pool.len() {
            interactive.enqueue(SyncTask::Terminate);
        }
        receiver.join();
        pool.join();
        if let Some(run) = full_sync {
            run.pool.join();
            discard_residual("full-sync", &run.queue);
        }
        discard_residual("interactive", &interactive);
        if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
            debug!(error = %e, "socket file already gone");
        }
        info!(state = "stopped");
        run_result
    }

    fn run_loop(
        &self,
        cache: &mut SyncCache,
        shutdown: &AtomicBool,
        deadline: Instant,
        full_sync: &mut Option<FullSyncRun>,
    ) -> Result<()> {
        info!(
            state = "running",
            seconds = self.config.run_duration().as_secs()
        );
        while Instant::now() < deadline {
            if shutdown.load(Ordering::SeqCst) {
                info!("interrupt received, draining early");
                break;
            }
            std::thread::sleep(TICK);

            if full_sync.as_ref().is_some_and(|run| run.pool.is_finished()) {
                if let Some(run) = full_sync.take() {
                    run.pool.join();
                    discard_residual("full-sync", &run.queue);
                    info!("full sync finished");
                }
            }

            let hour = chrono::Local::now().hour();
            if full_sync.is_none()
                && hour == self.config.daemon.fullsync_hour
                && cache.is_full_sync_due()?
            {
                *full_sync = Some(self.start_full_sync()?);
            }
        }
        Ok(())
    }

    /// Spin up a dedicated queue and worker set and seed the fan-out. Runs
    /// concurrently with interactive processing.
    fn start_full_sync(&self) -> Result<FullSyncRun> {
        info!("starting full sync");
        let queue = TaskQueue::new();
        let pool = with_signals_blocked(|| {
            WorkerPool::start(
                "full-sync",
                self.config.full_sync_workers(),
                &queue,
                &self.config,
            )
        })?;
        queue.enqueue(SyncTask::FullSyncStart);
        Ok(FullSyncRun { queue, pool })
    }
}

fn discard_residual(queue_name: &str, queue: &TaskQueue) {
    let leftover = queue.drain(DRAIN_LIMIT);
    if !leftover.is_empty() {
        warn!(
            queue = queue_name,
            count = leftover.len(),
            "discarding residual tasks"
        );
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Run `f` with SIGINT/SIGTERM blocked on the calling thread. Threads
/// spawned inside inherit the blocked mask, so signal delivery stays on the
/// supervisor thread and never lands on a half-initialized child.
fn with_signals_blocked<T>(f: impl FnOnce() -> T) -> T {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    let mut previous = SigSet::empty();
    let blocked =
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), Some(&mut previous)).is_ok();
    let result = f();
    if blocked {
        if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None) {
            warn!(error = %e, "could not restore signal mask");
        }
    }
    result
}

//! Periodic garbage-collection workers.
//!
//! Each primitive gets one worker: a tokio task that ticks on a fixed
//! interval, enumerates the shards of its application, and invokes the GC
//! entry point on every shard concurrently through a [`GcApi`] client
//! (normally the routed gateway client). Workers are stateless and
//! at-most-once per tick; a failed shard is logged and retried implicitly on
//! the next tick. Correctness never depends on a worker running — only the
//! liveness of bounded state growth does.
//!
//! The workers are the one place in the system that reads the wall clock:
//! `now` is stamped here, outside the deterministic cores, before a GC
//! request enters the replicated log.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use futures::future::join_all;
use rook_core::locks::RunLocksGarbageCollectionRequest;
use rook_core::semaphores::RunSemaphoresGarbageCollectionRequest;
use rook_core::wait_groups::RunWaitGroupsGarbageCollectionRequest;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

/// Application names used for shard enumeration.
pub const LOCKS_APPLICATION: &str = "locks";
pub const SEMAPHORES_APPLICATION: &str = "semaphores";
pub const WAIT_GROUPS_APPLICATION: &str = "wait_groups";

/// Client surface the workers drive; implemented by the routed core client.
#[async_trait]
pub trait GcApi: Send + Sync + 'static {
    /// Shard ids of the given application.
    async fn list_shards(&self, application: &str) -> anyhow::Result<Vec<String>>;

    async fn run_locks_garbage_collection(
        &self,
        shard_id: &str,
        request: RunLocksGarbageCollectionRequest,
    ) -> anyhow::Result<()>;

    async fn run_semaphores_garbage_collection(
        &self,
        shard_id: &str,
        request: RunSemaphoresGarbageCollectionRequest,
    ) -> anyhow::Result<()>;

    async fn run_wait_groups_garbage_collection(
        &self,
        shard_id: &str,
        request: RunWaitGroupsGarbageCollectionRequest,
    ) -> anyhow::Result<()>;
}

/// Worker tuning. The defaults match production: a 5 second tick, pages of
/// 100 GC records and 1000 entities, and a budget of 1000 touched objects
/// per pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GcWorkerConfig {
    pub interval: Duration,
    pub gc_records_page_size: i64,
    pub gc_record_entities_page_size: i64,
    pub max_visited_entities: i64,
}

impl Default for GcWorkerConfig {
    fn default() -> GcWorkerConfig {
        GcWorkerConfig {
            interval: Duration::from_secs(5),
            gc_records_page_size: 100,
            gc_record_entities_page_size: 1000,
            max_visited_entities: 1000,
        }
    }
}

/// Nanoseconds since the Unix epoch, as stamped into GC requests.
fn now_unix_nanos() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_nanos() as i64).unwrap_or(0)
}

/// Cancellation plus join handle for one running worker task.
struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn spawn<F, Fut>(interval: Duration, tick: F) -> WorkerHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
        });

        WorkerHandle { cancel, task }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Ticks lock GC across every shard of the locks application.
pub struct LocksGcWorker {
    handle: WorkerHandle,
}

impl LocksGcWorker {
    pub fn start<A: GcApi>(api: Arc<A>, config: GcWorkerConfig) -> LocksGcWorker {
        let interval = config.interval;
        let handle = WorkerHandle::spawn(interval, move || {
            let api = Arc::clone(&api);
            let config = config.clone();
            async move {
                let shards = match api.list_shards(LOCKS_APPLICATION).await {
                    Ok(shards) => shards,
                    Err(error) => {
                        warn!(%error, "listing locks shards failed");
                        return;
                    }
                };

                let now = now_unix_nanos();
                join_all(shards.iter().map(|shard_id| {
                    let api = Arc::clone(&api);
                    let config = config.clone();
                    async move {
                        let started = Instant::now();
                        let result = api
                            .run_locks_garbage_collection(shard_id, RunLocksGarbageCollectionRequest {
                                now,
                                gc_records_page_size: config.gc_records_page_size,
                                gc_record_locks_page_size: config.gc_record_entities_page_size,
                                max_visited_locks: config.max_visited_entities,
                            })
                            .await;
                        match result {
                            Ok(()) => debug!(
                                shard_id = %shard_id,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "locks gc run finished"
                            ),
                            Err(error) => warn!(shard_id = %shard_id, %error, "locks gc run failed"),
                        }
                    }
                }))
                .await;
            }
        });

        LocksGcWorker { handle }
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

/// Ticks semaphore GC across every shard of the semaphores application.
pub struct SemaphoresGcWorker {
    handle: WorkerHandle,
}

impl SemaphoresGcWorker {
    pub fn start<A: GcApi>(api: Arc<A>, config: GcWorkerConfig) -> SemaphoresGcWorker {
        let interval = config.interval;
        let handle = WorkerHandle::spawn(interval, move || {
            let api = Arc::clone(&api);
            let config = config.clone();
            async move {
                let shards = match api.list_shards(SEMAPHORES_APPLICATION).await {
                    Ok(shards) => shards,
                    Err(error) => {
                        warn!(%error, "listing semaphores shards failed");
                        return;
                    }
                };

                let now = now_unix_nanos();
                join_all(shards.iter().map(|shard_id| {
                    let api = Arc::clone(&api);
                    let config = config.clone();
                    async move {
                        let started = Instant::now();
                        let result = api
                            .run_semaphores_garbage_collection(
                                shard_id,
                                RunSemaphoresGarbageCollectionRequest {
                                    now,
                                    gc_records_page_size: config.gc_records_page_size,
                                    gc_record_semaphores_page_size: config.gc_record_entities_page_size,
                                    max_visited_semaphores: config.max_visited_entities,
                                },
                            )
                            .await;
                        match result {
                            Ok(()) => debug!(
                                shard_id = %shard_id,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "semaphores gc run finished"
                            ),
                            Err(error) => warn!(shard_id = %shard_id, %error, "semaphores gc run failed"),
                        }
                    }
                }))
                .await;
            }
        });

        SemaphoresGcWorker { handle }
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

/// Ticks wait-group GC across every shard of the wait-groups application.
pub struct WaitGroupsGcWorker {
    handle: WorkerHandle,
}

impl WaitGroupsGcWorker {
    pub fn start<A: GcApi>(api: Arc<A>, config: GcWorkerConfig) -> WaitGroupsGcWorker {
        let interval = config.interval;
        let handle = WorkerHandle::spawn(interval, move || {
            let api = Arc::clone(&api);
            let config = config.clone();
            async move {
                let shards = match api.list_shards(WAIT_GROUPS_APPLICATION).await {
                    Ok(shards) => shards,
                    Err(error) => {
                        warn!(%error, "listing wait groups shards failed");
                        return;
                    }
                };

                let now = now_unix_nanos();
                join_all(shards.iter().map(|shard_id| {
                    let api = Arc::clone(&api);
                    let config = config.clone();
                    async move {
                        let started = Instant::now();
                        let result = api
                            .run_wait_groups_garbage_collection(
                                shard_id,
                                RunWaitGroupsGarbageCollectionRequest {
                                    now,
                                    gc_records_page_size: config.gc_records_page_size,
                                    gc_record_wait_groups_page_size: config.gc_record_entities_page_size,
                                    max_deleted_objects: config.max_visited_entities,
                                },
                            )
                            .await;
                        match result {
                            Ok(()) => debug!(
                                shard_id = %shard_id,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "wait groups gc run finished"
                            ),
                            Err(error) => warn!(shard_id = %shard_id, %error, "wait groups gc run failed"),
                        }
                    }
                }))
                .await;
            }
        });

        WaitGroupsGcWorker { handle }
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

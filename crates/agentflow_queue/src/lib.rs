//! `GroupQueue` — per-key FIFO admission, single-inflight-per-group,
//! preemption, and dedup (spec.md §4.3).
//!
//! Grounded on `casparian_sentinel::db::queue::JobQueue::pop_job`'s
//! atomic claim-then-run shape, generalized from a SQL `UPDATE...WHERE` to an
//! in-process `HashSet`-guarded claim (`QueueEntry` is explicitly in-memory
//! per spec.md §3), and on AutOSINT's `ProcessorPool`
//! (`tvanderb-AutOSINT/crates/engine/src/processor/pool.rs`) for the
//! per-key worker dispatch idiom over a shared `tokio::sync::Mutex` state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use agentflow_runtime::StdinCloser;

/// How GroupQueue decides current admission capacity (spec.md §4.1/§4.3:
/// `ResourceMonitor.update()` invoked before every admission decision).
pub trait Capacity: Send + Sync {
    fn current_max(&self) -> usize;
}

/// Adapts an `agentflow_resource::ResourceMonitor` behind a std mutex —
/// `update()` is documented as cheap, so a blocking lock on the admission
/// path is acceptable (spec.md §4.1).
pub struct ResourceMonitorCapacity(std::sync::Mutex<agentflow_resource::ResourceMonitor>);

impl ResourceMonitorCapacity {
    pub fn new(monitor: agentflow_resource::ResourceMonitor) -> Self {
        Self(std::sync::Mutex::new(monitor))
    }
}

impl Capacity for ResourceMonitorCapacity {
    fn current_max(&self) -> usize {
        self.0
            .lock()
            .expect("resource monitor mutex poisoned")
            .update()
    }
}

/// Reports streamed activity back to the queue so `preemptForPendingTasks`
/// can find genuinely idle running entries (spec.md §4.3).
#[derive(Clone)]
pub struct ActivityReporter(Arc<AtomicI64>);

impl ActivityReporter {
    pub fn touch(&self) {
        self.0.store(now_millis(), Ordering::Relaxed);
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Outcome of a finished `QueueEntry` (spec.md §4.3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed,
    Failed,
    TimedOut,
}

/// A zero-arg unit of work, given a [`StdinCloser`] to honor external
/// preemption/timeout requests and an [`ActivityReporter`] to touch on every
/// streamed partial result.
pub type Work = Box<dyn FnOnce(StdinCloser, ActivityReporter) -> BoxFuture<WorkOutcome> + Send>;

struct QueueEntry {
    task_id: String,
    enqueued_at: DateTime<Utc>,
    #[allow(dead_code)]
    attempt: u32,
    work: Work,
}

struct RunningInfo {
    task_id: String,
    closer: StdinCloser,
    last_activity: Arc<AtomicI64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("queue for {key} is full ({depth} pending)")]
pub struct AdmissionError {
    pub key: String,
    pub depth: usize,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<QueueEntry>>,
    running_task_ids: HashSet<String>,
    running: HashMap<String, RunningInfo>,
    duplicate_rejections: u64,
}

struct Inner {
    state: Mutex<State>,
    capacity: Arc<dyn Capacity>,
    max_queue_size: usize,
    /// Window of no-streamed-activity after which a running entry counts as
    /// idle for preemption purposes (spec.md §4.3 "a short window").
    idle_preempt_window_ms: i64,
}

/// Per-group FIFO queue: admission, ordering, concurrency, preemption
/// (spec.md §4.3).
#[derive(Clone)]
pub struct GroupQueue {
    inner: Arc<Inner>,
}

impl GroupQueue {
    pub fn new(capacity: Arc<dyn Capacity>, max_queue_size: usize) -> Self {
        Self::with_idle_window(capacity, max_queue_size, 5_000)
    }

    pub fn with_idle_window(
        capacity: Arc<dyn Capacity>,
        max_queue_size: usize,
        idle_preempt_window_ms: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                capacity,
                max_queue_size: max_queue_size.max(1),
                idle_preempt_window_ms,
            }),
        }
    }

    /// Enqueue `work` at the tail of `key`'s FIFO (spec.md §4.3).
    ///
    /// Silently discards (G3) if `task_id` is already running; rejects with
    /// [`AdmissionError`] if the per-key queue is already at capacity.
    pub async fn enqueue_task(
        &self,
        key: impl Into<String>,
        task_id: impl Into<String>,
        work: Work,
    ) -> Result<(), AdmissionError> {
        let key = key.into();
        let task_id = task_id.into();

        {
            let mut state = self.inner.state.lock().await;

            if state.running_task_ids.contains(&task_id) {
                state.duplicate_rejections += 1;
                debug!(task_id = %task_id, "discarding duplicate enqueue of a running task");
                return Ok(());
            }

            let depth = state.queues.get(&key).map(VecDeque::len).unwrap_or(0);
            if depth >= self.inner.max_queue_size {
                return Err(AdmissionError { key, depth });
            }

            state.queues.entry(key.clone()).or_default().push_back(QueueEntry {
                task_id,
                enqueued_at: Utc::now(),
                attempt: 0,
                work,
            });
        }

        dispatch(self.inner.clone()).await;
        Ok(())
    }

    /// Request the currently running entry for `key` (if any) to close its
    /// worker's stdin (spec.md §4.3 idle/hard-timeout paths).
    pub async fn close_stdin(&self, key: &str) -> bool {
        let state = self.inner.state.lock().await;
        match state.running.get(key) {
            Some(running) => {
                running.closer.request_close();
                true
            }
            None => false,
        }
    }

    /// If pending entries exist but we're at capacity, nudge the oldest idle
    /// running entry to free a slot sooner than its own idle timer would.
    pub async fn preempt_for_pending_tasks(&self) {
        let target_key = {
            let state = self.inner.state.lock().await;
            let current_max = self.inner.capacity.current_max();
            let has_pending = state.queues.values().any(|q| !q.is_empty());
            if !has_pending || state.running.len() < current_max {
                return;
            }

            let now = now_millis();
            let mut oldest: Option<(String, i64)> = None;
            for (key, info) in state.running.iter() {
                let last = info.last_activity.load(Ordering::Relaxed);
                if now - last >= self.inner.idle_preempt_window_ms {
                    if oldest.as_ref().map(|(_, t)| last < *t).unwrap_or(true) {
                        oldest = Some((key.clone(), last));
                    }
                }
            }
            oldest.map(|(key, _)| key)
        };

        if let Some(key) = target_key {
            info!(key = %key, "preempting idle running entry for a pending task");
            self.close_stdin(&key).await;
        }
    }

    pub async fn is_task_running(&self, task_id: &str) -> bool {
        self.inner.state.lock().await.running_task_ids.contains(task_id)
    }

    /// Total pending (not yet running) entries across all keys.
    pub async fn queue_depth(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .queues
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub async fn queue_depth_for(&self, key: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.state.lock().await.running.len()
    }

    pub async fn duplicate_rejections(&self) -> u64 {
        self.inner.state.lock().await.duplicate_rejections
    }
}

fn dispatch(inner: Arc<Inner>) -> BoxFuture<()> {
    Box::pin(async move {
        loop {
            let picked = {
                let mut state = inner.state.lock().await;
                let current_max = inner.capacity.current_max();
                if state.running.len() >= current_max {
                    None
                } else {
                    let candidate_key = state
                        .queues
                        .iter()
                        .find(|(key, queue)| !queue.is_empty() && !state.running.contains_key(*key))
                        .map(|(key, _)| key.clone());

                    candidate_key.map(|key| {
                        let queue = state.queues.get_mut(&key).expect("candidate key exists");
                        let entry = queue.pop_front().expect("candidate queue is non-empty");
                        if queue.is_empty() {
                            state.queues.remove(&key);
                        }

                        let closer = StdinCloser::new();
                        let activity = Arc::new(AtomicI64::new(now_millis()));
                        state.running_task_ids.insert(entry.task_id.clone());
                        state.running.insert(
                            key.clone(),
                            RunningInfo {
                                task_id: entry.task_id.clone(),
                                closer: closer.clone(),
                                last_activity: activity.clone(),
                            },
                        );
                        (key, entry, closer, activity)
                    })
                }
            };

            let Some((key, entry, closer, activity)) = picked else {
                break;
            };

            let inner2 = inner.clone();
            tokio::spawn(async move {
                let reporter = ActivityReporter(activity);
                let task_id = entry.task_id.clone();
                let _outcome = (entry.work)(closer, reporter).await;

                {
                    let mut state = inner2.state.lock().await;
                    state.running.remove(&key);
                    state.running_task_ids.remove(&task_id);
                }

                dispatch(inner2).await;
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FixedCapacity(usize);
    impl Capacity for FixedCapacity {
        fn current_max(&self) -> usize {
            self.0
        }
    }

    fn make_queue(max: usize) -> GroupQueue {
        GroupQueue::new(Arc::new(FixedCapacity(max)), 20)
    }

    fn noop_work(ran: Arc<AtomicUsize>) -> Work {
        Box::new(move |_closer, _activity| {
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                WorkOutcome::Completed
            })
        })
    }

    fn blocking_work(gate: Arc<tokio::sync::Notify>) -> Work {
        Box::new(move |_closer, _activity| {
            Box::pin(async move {
                gate.notified().await;
                WorkOutcome::Completed
            })
        })
    }

    #[tokio::test]
    async fn single_inflight_per_group_enforced() {
        let queue = make_queue(4);
        let gate = Arc::new(tokio::sync::Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        queue
            .enqueue_task("g1", "t1", blocking_work(gate.clone()))
            .await
            .unwrap();
        queue.enqueue_task("g1", "t2", noop_work(ran.clone())).await.unwrap();

        tokio::task::yield_now().await;
        assert_eq!(queue.active_count().await, 1);
        assert_eq!(queue.queue_depth_for("g1").await, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_running_task_is_discarded() {
        let queue = make_queue(4);
        let gate = Arc::new(tokio::sync::Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        queue
            .enqueue_task("g1", "t1", blocking_work(gate.clone()))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(queue.is_task_running("t1").await);

        // Re-enqueuing the same task id while it's running must be a no-op.
        queue.enqueue_task("g1", "t1", noop_work(ran.clone())).await.unwrap();
        assert_eq!(queue.queue_depth_for("g1").await, 0);

        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!queue.is_task_running("t1").await);
    }

    #[tokio::test]
    async fn queue_full_rejects_with_admission_error() {
        let queue = GroupQueue::new(Arc::new(FixedCapacity(1)), 1);
        let gate = Arc::new(tokio::sync::Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        queue
            .enqueue_task("g1", "t1", blocking_work(gate.clone()))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        queue.enqueue_task("g1", "t2", noop_work(ran.clone())).await.unwrap();
        let err = queue
            .enqueue_task("g1", "t3", noop_work(ran.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.key, "g1");

        gate.notify_one();
    }

    #[tokio::test]
    async fn global_concurrency_bound_is_respected_across_keys() {
        let queue = make_queue(1);
        let gate = Arc::new(tokio::sync::Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        queue
            .enqueue_task("g1", "t1", blocking_work(gate.clone()))
            .await
            .unwrap();
        queue.enqueue_task("g2", "t2", noop_work(ran.clone())).await.unwrap();

        tokio::task::yield_now().await;
        assert_eq!(queue.active_count().await, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_stdin_targets_the_running_entry_for_a_key() {
        let queue = make_queue(4);
        let gate = Arc::new(tokio::sync::Notify::new());

        queue
            .enqueue_task("g1", "t1", blocking_work(gate.clone()))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(queue.close_stdin("g1").await);
        assert!(!queue.close_stdin("g-missing").await);
        gate.notify_one();
    }
}

//! Bounded pool for provider fetches.
//!
//! Tasks are spawned onto the manager's tokio runtime and wait for one of
//! `workers` semaphore permits before their blocking body runs on the blocking
//! thread pool. A task whose cancellation token fires while it waits for a
//! permit never runs its body; its cancellation handler runs instead.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// A unit of work for the [`FetchPool`].
pub trait PoolTask: Send + 'static {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Blocking body, run once a permit is granted.
    fn run(self);

    /// Called instead of [`run`](Self::run) when cancelled before starting.
    fn cancelled(self);
}

// =============================================================================
// Activity tracking
// =============================================================================

#[derive(Debug, Default)]
struct ActivityState {
    in_flight: usize,
    peak_in_flight: usize,
    started: u64,
    completed_generation: u64,
}

/// Counts in-flight tasks and completed scheduling passes.
///
/// Lets callers wait until the scheduler has caught up with a given zone
/// update and every fetch it dispatched has finished.
#[derive(Debug, Default)]
pub struct Activity {
    state: Mutex<ActivityState>,
    changed: Condvar,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    fn task_started(&self) {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.started += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
    }

    fn task_finished(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Record that the pass for zone `generation` has finished dispatching.
    pub fn pass_completed(&self, generation: u64) {
        let mut state = self.state.lock();
        state.completed_generation = state.completed_generation.max(generation);
        self.changed.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().peak_in_flight
    }

    /// Total tasks ever submitted.
    pub fn started(&self) -> u64 {
        self.state.lock().started
    }

    pub fn completed_generation(&self) -> u64 {
        self.state.lock().completed_generation
    }

    /// Block until pass `generation` is done and no task is in flight.
    ///
    /// Returns false on timeout.
    pub fn wait_idle(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.completed_generation < generation || state.in_flight > 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.completed_generation >= generation && state.in_flight == 0;
            }
        }
        true
    }
}

/// Keeps a task counted as in flight until dropped.
struct InFlightGuard {
    activity: Arc<Activity>,
}

impl InFlightGuard {
    fn new(activity: Arc<Activity>) -> Self {
        activity.task_started();
        Self { activity }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.activity.task_finished();
    }
}

// =============================================================================
// Fetch pool
// =============================================================================

/// Semaphore-bounded task pool on a tokio runtime.
pub struct FetchPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    activity: Arc<Activity>,
}

impl FetchPool {
    pub fn new(handle: Handle, workers: usize, activity: Arc<Activity>) -> Self {
        let workers = workers.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            activity,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Permits not currently held by a running task.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// Queue `task`. The task counts as in flight from this call on.
    pub fn spawn<T: PoolTask>(&self, token: CancellationToken, task: T) {
        let guard = InFlightGuard::new(Arc::clone(&self.activity));
        let permits = Arc::clone(&self.permits);

        self.handle.spawn(async move {
            let _guard = guard;

            let permit = tokio::select! {
                biased;

                _ = token.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                task.cancelled();
                return;
            };

            let name = task.name();
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                task.run();
            })
            .await;

            if let Err(e) = result {
                error!(task = name, error = %e, "Pool task did not complete");
            }
        });
    }
}

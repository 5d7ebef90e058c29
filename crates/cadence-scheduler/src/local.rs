//! In-process worker fleet on tokio.
//!
//! Each submitted task is a spawned tokio task that walks
//! `scheduled -> queued -> reserved -> active` and is tracked by id until it
//! finishes, so the fleet can be inspected and cancelled like a remote one.
//! Execution slots come from a semaphore; a restart swaps in a fresh one and
//! closes the old, which sends waiting tasks to the new pool while running
//! tasks finish on the permits they hold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::fleet::{FleetError, FleetState, TaskDescriptor, WorkerFleet, WorkerReport};

/// Executes one target action.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: serde_json::Value) -> anyhow::Result<()>;
}

struct Tracked {
    descriptor: TaskDescriptor,
    state: FleetState,
    abort: Option<AbortHandle>,
}

struct Inner {
    name: String,
    concurrency: usize,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    tasks: Mutex<HashMap<String, Tracked>>,
    pool: Mutex<Arc<Semaphore>>,
}

/// Single-worker fleet; cheap to clone.
#[derive(Clone)]
pub struct LocalFleet {
    inner: Arc<Inner>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalFleet {
    /// A fleet whose single worker `name` runs at most `concurrency` tasks
    /// at once.
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                concurrency,
                handlers: RwLock::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                pool: Mutex::new(Arc::new(Semaphore::new(concurrency))),
            }),
        }
    }

    /// Route `target` to `handler`, replacing any previous registration.
    pub fn register(&self, target: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let target = target.into();
        debug!(%target, "task handler registered");
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, handler);
    }

    fn handler(&self, target: &str) -> Option<Arc<dyn TaskHandler>> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    /// Submit `payload` for `target`, to start no earlier than `eta`.
    /// Returns the task id.
    pub fn submit(
        &self,
        target: &str,
        payload: String,
        eta: Option<DateTime<Utc>>,
    ) -> Result<String, FleetError> {
        let Some(handler) = self.handler(target) else {
            warn!(%target, "no handler registered; task rejected");
            return Err(FleetError::NoHandler(target.to_string()));
        };

        let id = Uuid::new_v4().to_string();
        let delay = eta.and_then(|at| (at - Utc::now()).to_std().ok());
        let state = if delay.is_some() {
            FleetState::Scheduled
        } else {
            FleetState::Queued
        };

        guard(&self.inner.tasks).insert(
            id.clone(),
            Tracked {
                descriptor: TaskDescriptor {
                    id: id.clone(),
                    target: target.to_string(),
                    payload: payload.clone(),
                },
                state,
                abort: None,
            },
        );

        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        let join = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            inner.execute(&task_id, handler, &payload).await;
        });

        // A cancel that raced the spawn already removed the entry.
        let mut tasks = guard(&self.inner.tasks);
        match tasks.get_mut(&id) {
            Some(tracked) => tracked.abort = Some(join.abort_handle()),
            None => join.abort(),
        }
        drop(tasks);

        debug!(task_id = %id, %target, %state, "task submitted");
        Ok(id)
    }
}

impl Inner {
    fn set_state(&self, id: &str, state: FleetState) -> bool {
        match guard(&self.tasks).get_mut(id) {
            Some(tracked) => {
                tracked.state = state;
                true
            }
            None => false,
        }
    }

    fn current_pool(&self) -> Arc<Semaphore> {
        Arc::clone(&guard(&self.pool))
    }

    async fn execute(&self, id: &str, handler: Arc<dyn TaskHandler>, payload: &str) {
        let _untrack = Untrack {
            tasks: &self.tasks,
            id,
            worker: &self.name,
        };
        if !self.set_state(id, FleetState::Reserved) {
            return;
        }

        let _permit = loop {
            match self.current_pool().acquire_owned().await {
                Ok(permit) => break permit,
                // Pool was restarted while waiting; queue on the new one.
                Err(_) => continue,
            }
        };

        if !self.set_state(id, FleetState::Active) {
            return;
        }

        let result = match serde_json::from_str(payload) {
            Ok(value) => handler.run(value).await,
            Err(e) => Err(anyhow::anyhow!("invalid payload: {e}")),
        };
        match result {
            Ok(()) => info!(task_id = %id, worker = %self.name, "task succeeded"),
            Err(e) => error!(task_id = %id, worker = %self.name, "task failed: {e:#}"),
        }
    }
}

/// Drops a task's entry once its execution ends, however it ends: normal
/// return, abort, or a panicking handler.
struct Untrack<'a> {
    tasks: &'a Mutex<HashMap<String, Tracked>>,
    id: &'a str,
    worker: &'a str,
}

impl Drop for Untrack<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(task_id = %self.id, worker = %self.worker, "task handler panicked");
        }
        guard(self.tasks).remove(self.id);
    }
}

#[async_trait]
impl WorkerFleet for LocalFleet {
    async fn list_inflight(&self, state: FleetState) -> Result<Vec<WorkerReport>, FleetError> {
        let tasks = guard(&self.inner.tasks)
            .values()
            .filter(|t| t.state == state)
            .map(|t| t.descriptor.clone())
            .collect();
        Ok(vec![WorkerReport {
            worker: self.inner.name.clone(),
            tasks: Ok(tasks),
        }])
    }

    async fn cancel(&self, task_id: &str) -> Result<(), FleetError> {
        let tracked = guard(&self.inner.tasks)
            .remove(task_id)
            .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))?;
        if let Some(abort) = tracked.abort {
            abort.abort();
        }
        debug!(%task_id, state = %tracked.state, "task aborted");
        Ok(())
    }

    async fn broadcast_restart(&self) -> Result<(), FleetError> {
        let fresh = Arc::new(Semaphore::new(self.inner.concurrency));
        let old = std::mem::replace(&mut *guard(&self.inner.pool), fresh);
        old.close();
        info!(worker = %self.inner.name, "execution pool restarted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        runs: Arc<AtomicUsize>,
        hold: Duration,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        async fn run(&self, _payload: serde_json::Value) -> anyhow::Result<()> {
            tokio::time::sleep(self.hold).await;
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fleet_with(hold: Duration, concurrency: usize) -> (LocalFleet, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let fleet = LocalFleet::new("local", concurrency);
        fleet.register(
            "send_message",
            Arc::new(Counting {
                runs: Arc::clone(&runs),
                hold,
            }),
        );
        (fleet, runs)
    }

    async fn ids_in(fleet: &LocalFleet, state: FleetState) -> Vec<String> {
        let reports = fleet.list_inflight(state).await.unwrap();
        reports
            .into_iter()
            .flat_map(|r| r.tasks.unwrap())
            .map(|t| t.id)
            .collect()
    }

    async fn wait_until_in(fleet: &LocalFleet, state: FleetState, id: &str) {
        for _ in 0..200 {
            if ids_in(fleet, state).await.iter().any(|t| t == id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} never reached {state}");
    }

    #[tokio::test]
    async fn submitted_task_runs_and_leaves_the_fleet() {
        let (fleet, runs) = fleet_with(Duration::ZERO, 2);
        let id = fleet
            .submit("send_message", r#"{"chat_id":"42"}"#.into(), None)
            .unwrap();
        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        for state in FleetState::ALL {
            assert!(!ids_in(&fleet, state).await.contains(&id));
        }
    }

    struct Exploding;

    #[async_trait]
    impl TaskHandler for Exploding {
        async fn run(&self, _payload: serde_json::Value) -> anyhow::Result<()> {
            panic!("handler blew up");
        }
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stay_in_flight() {
        let fleet = LocalFleet::new("local", 1);
        fleet.register("send_message", Arc::new(Exploding));
        let id = fleet
            .submit("send_message", r#"{"chat_id":"42"}"#.into(), None)
            .unwrap();

        let mut gone = false;
        for _ in 0..200 {
            let mut seen = false;
            for state in FleetState::ALL {
                seen |= ids_in(&fleet, state).await.contains(&id);
            }
            if !seen {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(gone, "task {id} still tracked after its handler panicked");
        assert!(matches!(
            fleet.cancel(&id).await,
            Err(FleetError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn unknown_target_is_rejected() {
        let (fleet, _) = fleet_with(Duration::ZERO, 1);
        let err = fleet.submit("scheduled_search", "{}".into(), None).unwrap_err();
        assert!(matches!(err, FleetError::NoHandler(t) if t == "scheduled_search"));
    }

    #[tokio::test]
    async fn future_eta_is_scheduled_and_cancel_prevents_run() {
        let (fleet, runs) = fleet_with(Duration::ZERO, 1);
        let eta = Utc::now() + chrono::Duration::milliseconds(200);
        let id = fleet
            .submit("send_message", r#"{"chat_id":"42"}"#.into(), Some(eta))
            .unwrap();
        assert_eq!(ids_in(&fleet, FleetState::Scheduled).await, vec![id.clone()]);

        fleet.cancel(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(matches!(
            fleet.cancel(&id).await,
            Err(FleetError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn running_task_is_terminated_by_cancel() {
        let (fleet, runs) = fleet_with(Duration::from_secs(30), 1);
        let id = fleet
            .submit("send_message", r#"{"chat_id":"42"}"#.into(), None)
            .unwrap();
        wait_until_in(&fleet, FleetState::Active, &id).await;

        fleet.cancel(&id).await.unwrap();
        assert!(ids_in(&fleet, FleetState::Active).await.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restart_moves_waiting_tasks_to_the_new_pool() {
        let (fleet, _) = fleet_with(Duration::from_secs(30), 1);
        let first = fleet
            .submit("send_message", r#"{"chat_id":"1"}"#.into(), None)
            .unwrap();
        wait_until_in(&fleet, FleetState::Active, &first).await;

        let second = fleet
            .submit("send_message", r#"{"chat_id":"2"}"#.into(), None)
            .unwrap();
        wait_until_in(&fleet, FleetState::Reserved, &second).await;

        fleet.broadcast_restart().await.unwrap();
        wait_until_in(&fleet, FleetState::Active, &second).await;
        assert!(ids_in(&fleet, FleetState::Active).await.contains(&first));
    }
}

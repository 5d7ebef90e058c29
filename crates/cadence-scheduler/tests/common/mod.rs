// Shared fixtures: a scriptable in-memory worker fleet and database helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::{
    db, FleetError, FleetState, InFlightCanceller, Orchestrator, OrchestratorSettings,
    TaskDescriptor, WorkerFleet, WorkerReport,
};
use rusqlite::Connection;

/// Fleet with preloaded tasks per state. Inspection of a state listed in
/// `failing_states` errors; a worker named in `failing_workers` reports an
/// error in every state.
#[derive(Default)]
pub struct FakeFleet {
    tasks: Mutex<HashMap<FleetState, Vec<(String, TaskDescriptor)>>>,
    failing_states: Mutex<HashSet<FleetState>>,
    failing_workers: Mutex<HashSet<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub restarts: AtomicUsize,
}

impl FakeFleet {
    pub fn add_task(&self, worker: &str, state: FleetState, id: &str, payload: &str) {
        self.tasks.lock().unwrap().entry(state).or_default().push((
            worker.to_string(),
            TaskDescriptor {
                id: id.to_string(),
                target: "send_message".to_string(),
                payload: payload.to_string(),
            },
        ));
    }

    pub fn fail_state(&self, state: FleetState) {
        self.failing_states.lock().unwrap().insert(state);
    }

    pub fn fail_worker(&self, worker: &str) {
        self.failing_workers.lock().unwrap().insert(worker.to_string());
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        let mut ids = self.cancelled.lock().unwrap().clone();
        ids.sort();
        ids
    }
}

#[async_trait]
impl WorkerFleet for FakeFleet {
    async fn list_inflight(&self, state: FleetState) -> Result<Vec<WorkerReport>, FleetError> {
        if self.failing_states.lock().unwrap().contains(&state) {
            return Err(FleetError::Unavailable(format!("{state} inspection refused")));
        }
        let failing_workers = self.failing_workers.lock().unwrap().clone();
        let tasks = self.tasks.lock().unwrap();

        let mut per_worker: HashMap<String, Vec<TaskDescriptor>> = HashMap::new();
        for (worker, task) in tasks.get(&state).into_iter().flatten() {
            per_worker.entry(worker.clone()).or_default().push(task.clone());
        }
        for worker in &failing_workers {
            per_worker.entry(worker.clone()).or_default();
        }

        Ok(per_worker
            .into_iter()
            .map(|(worker, tasks)| {
                let tasks = if failing_workers.contains(&worker) {
                    Err(FleetError::Unavailable(format!("{worker} unreachable")))
                } else {
                    Ok(tasks)
                };
                WorkerReport { worker, tasks }
            })
            .collect())
    }

    async fn cancel(&self, task_id: &str) -> Result<(), FleetError> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut found = false;
        for list in tasks.values_mut() {
            let before = list.len();
            list.retain(|(_, t)| t.id != task_id);
            found |= list.len() != before;
        }
        if !found {
            return Err(FleetError::UnknownTask(task_id.to_string()));
        }
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }

    async fn broadcast_restart(&self) -> Result<(), FleetError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn open_db(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    db::configure(&conn).unwrap();
    db::init_db(&conn).unwrap();
    cadence_users::db::init_db(&conn).unwrap();
    conn
}

pub fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    db::configure(&conn).unwrap();
    db::init_db(&conn).unwrap();
    cadence_users::db::init_db(&conn).unwrap();
    conn
}

pub fn orchestrator_on(conn: Connection, fleet: Arc<FakeFleet>) -> (Orchestrator, Arc<Mutex<Connection>>) {
    let db = Arc::new(Mutex::new(conn));
    let orch = Orchestrator::new(
        Arc::clone(&db),
        InFlightCanceller::new(fleet, Duration::from_millis(500)),
        OrchestratorSettings::default(),
    );
    (orch, db)
}

pub fn count(conn: &Mutex<Connection>, table: &str) -> i64 {
    conn.lock()
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

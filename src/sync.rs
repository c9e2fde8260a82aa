//src/sync.rs
//! Best-effort reconciliation with the remote store.
//!
//! Pulls replace local state wholesale (the server wins). Pushes go through an
//! in-memory outbox drained by at most one background task; a failed push is logged
//! and dropped, the next start-up pull supersedes it.
use crate::db::{DbError, LocalStore};
use crate::models::{ExerciseSessionRecord, TraineeRecord, TrainingCatalog};
use crate::session::SessionEvent;
use crate::sync_client::RemoteStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote sync failed: {0:#}")]
    Remote(#[from] anyhow::Error),
    #[error("Failed to apply server data locally: {0}")]
    Store(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncIntent {
    ExerciseSession(ExerciseSessionRecord),
    FullResync(TraineeRecord),
}

impl SyncIntent {
    fn describe(&self) -> String {
        match self {
            Self::ExerciseSession(r) => format!("exercise session '{}'", r.exercise),
            Self::FullResync(_) => "full resync".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub pushed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub plans_with_defaults: usize,
    pub trainings_with_progress: usize,
    pub exercises_with_history: usize,
    pub first_time_completed: bool,
}

struct Shared {
    outbox: Mutex<VecDeque<SyncIntent>>,
    in_flight: AtomicBool,
    stats: Mutex<SyncStats>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            shared: Arc::new(Shared {
                outbox: Mutex::new(VecDeque::new()),
                in_flight: AtomicBool::new(false),
                stats: Mutex::new(SyncStats::default()),
            }),
        }
    }

    /// Fetches the server record and replaces local defaults, progress, history and
    /// the first-time flag with it. Local data not yet pushed is lost.
    pub async fn pull_and_replace(&self, store: &mut LocalStore) -> Result<PullSummary, SyncError> {
        let record = self.remote.fetch_trainee_record().await?;
        let summary = PullSummary {
            plans_with_defaults: record.defaults.len(),
            trainings_with_progress: record.progress.len(),
            exercises_with_history: record.history.len(),
            first_time_completed: record.first_time_completed,
        };
        store.replace_with(record)?;
        info!("Local stores replaced from server record: {:?}", summary);
        Ok(summary)
    }

    /// Fetches the assigned plan(s) and stores the first one as the active catalog.
    pub async fn pull_training_plan(
        &self,
        store: &LocalStore,
    ) -> Result<Option<TrainingCatalog>, SyncError> {
        let plans = self.remote.fetch_training_plans().await?;
        let Some(plan) = plans.into_iter().next() else {
            warn!("Server has no training plan assigned to this trainee");
            return Ok(None);
        };
        store.save_training_plan(&plan)?;
        Ok(Some(plan))
    }

    /// Queues an intent. Never blocks on the network.
    pub fn enqueue(&self, intent: SyncIntent) {
        debug!("Queued {}", intent.describe());
        lock(&self.shared.outbox).push_back(intent);
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared.outbox).len()
    }

    pub fn stats(&self) -> SyncStats {
        *lock(&self.shared.stats)
    }

    /// Turns controller events into sync intents and starts draining.
    pub fn handle_events(&self, events: &[SessionEvent], store: &LocalStore) {
        let mut queued = false;
        for event in events {
            match event {
                SessionEvent::ExerciseCompleted(record) => {
                    self.enqueue(SyncIntent::ExerciseSession(record.clone()));
                    self.enqueue(SyncIntent::FullResync(store.trainee_record()));
                    queued = true;
                }
                SessionEvent::HistoryEdited { .. } => {
                    self.enqueue(SyncIntent::FullResync(store.trainee_record()));
                    queued = true;
                }
                SessionEvent::RestExpired { .. } | SessionEvent::SessionCompleted { .. } => {}
            }
        }
        if queued {
            self.kick();
        }
    }

    /// Spawns the drain task unless one is already running. Without a tokio runtime
    /// the intents stay queued until `flush`.
    pub fn kick(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime; {} intent(s) wait for flush", self.pending());
            return;
        };
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            return; // Single flight
        }
        let engine = self.clone();
        handle.spawn(async move {
            loop {
                engine.drain().await;
                engine.shared.in_flight.store(false, Ordering::Release);
                // Something may have been queued after the last pop
                if engine.pending() == 0 || engine.shared.in_flight.swap(true, Ordering::AcqRel) {
                    break;
                }
            }
        });
    }

    /// Pushes everything queued. Waits for a running drain task, then takes the
    /// flight itself so pushes never overlap.
    pub async fn flush(&self) -> SyncStats {
        loop {
            if self.shared.in_flight.swap(true, Ordering::AcqRel) {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            self.drain().await;
            self.shared.in_flight.store(false, Ordering::Release);
            if self.pending() == 0 {
                break;
            }
        }
        self.stats()
    }

    async fn drain(&self) {
        loop {
            let next = lock(&self.shared.outbox).pop_front();
            let Some(intent) = next else {
                break;
            };
            self.push(intent).await;
        }
    }

    async fn push(&self, intent: SyncIntent) {
        let result = match &intent {
            SyncIntent::ExerciseSession(record) => self.remote.push_exercise_session(record).await,
            SyncIntent::FullResync(record) => self.remote.push_trainee_record(record).await,
        };
        let mut stats = lock(&self.shared.stats);
        match result {
            Ok(()) => stats.pushed += 1,
            Err(e) => {
                stats.failed += 1;
                warn!("Dropping {} after failed push: {:#}", intent.describe(), e);
            }
        }
    }
}

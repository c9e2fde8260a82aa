//src/session.rs
//! Session state machine.
//!
//! Each exercise moves `NotStarted -> Active -> (Resting <-> Active) -> Completed`.
//! Every transition writes through to the local store (history, progress and the
//! in-progress session itself) before returning; remote sync is left to the caller,
//! which drains [`SessionEvent`]s after each call.
use crate::db::{DbError, LocalStore, KEY_ACTIVE_SESSION};
use crate::defaults::{self, ResolvedValues};
use crate::models::{
    ExerciseSessionRecord, ExerciseSpec, HistoryEntry, SetResult, Training, TrainingCatalog,
};
use crate::progress::DayBoundary;
use crate::timer::{self, Clock, RestScheduler, TICK_PERIOD_MS};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum_macros::{Display, EnumIter};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No training session is active. Start one with 'session start <training>'.")]
    NoActiveSession,
    #[error("Training not found in the current plan: {0}")]
    UnknownTraining(String),
    #[error("Exercise not found in the current training: {0}")]
    UnknownExercise(String),
    #[error("Exercise index {0} is out of range")]
    IndexOutOfRange(usize),
    #[error("Exercise '{0}' is not completed yet; only completed sets can be edited")]
    NotCompleted(String),
    #[error("Local store error: {0}")]
    Store(#[from] DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, Serialize, Deserialize)]
pub enum ExerciseStatus {
    NotStarted,
    Active,
    Resting,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExerciseState {
    pub current_set: u32,
    pub completed: bool,
    pub is_active: bool,
    pub is_resting: bool,
    pub time_left: u32,
    pub start_timestamp: Option<i64>, // epoch ms
    pub rest_duration: Option<u32>,   // seconds
    pub weight: Option<f64>,
    pub repeats: Option<u32>,
    pub rest_time: Option<u32>, // Resolved default rest
    pub custom_rest_time: Option<u32>,
    pub sets_data: Vec<SetResult>,
}

impl ExerciseState {
    fn from_resolved(resolved: ResolvedValues) -> Self {
        Self {
            weight: resolved.weight,
            repeats: resolved.repeats,
            rest_time: resolved.rest_time,
            ..Self::default()
        }
    }

    pub fn status(&self) -> ExerciseStatus {
        if self.completed {
            ExerciseStatus::Completed
        } else if self.is_resting {
            ExerciseStatus::Resting
        } else if self.is_active {
            ExerciseStatus::Active
        } else {
            ExerciseStatus::NotStarted
        }
    }

    /// The UI must keep "finish set" disabled while this is false.
    pub fn can_finish_set(&self) -> bool {
        self.is_active && !self.completed && !(self.is_resting && self.time_left > 0)
    }

    fn remaining_at(&self, now_ms: i64) -> u32 {
        match (self.is_resting, self.start_timestamp, self.rest_duration) {
            (true, Some(start), Some(duration)) => timer::remaining_seconds(now_ms, start, duration),
            _ => 0,
        }
    }

    /// Recomputes `time_left` and ends the rest when it hits zero. Returns true only
    /// on the call that actually ended the rest.
    fn refresh_rest(&mut self, now_ms: i64) -> bool {
        if !self.is_resting {
            return false;
        }
        self.time_left = self.remaining_at(now_ms);
        if self.time_left == 0 {
            self.expire_rest();
            return true;
        }
        false
    }

    fn expire_rest(&mut self) {
        self.is_resting = false;
        self.start_timestamp = None;
        self.rest_duration = None;
        self.time_left = 0;
    }

    fn mark_completed(&mut self, total_sets: u32) {
        self.expire_rest();
        self.completed = true;
        self.is_active = false;
        self.current_set = total_sets;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: Uuid,
    pub plan_id: String,
    pub selected_training: Option<String>,
    pub current_exercise_index: usize,
    pub exercises: Vec<String>,
    pub exercise_states: BTreeMap<String, ExerciseState>,
    pub is_complete: bool,
}

impl SessionState {
    pub fn all_completed(&self) -> bool {
        self.exercises
            .iter()
            .all(|name| self.exercise_states.get(name).is_some_and(|s| s.completed))
    }

    fn is_exercise_completed(&self, index: usize) -> bool {
        self.exercises
            .get(index)
            .and_then(|name| self.exercise_states.get(name))
            .is_some_and(|s| s.completed)
    }

    /// First non-completed exercise after `current_exercise_index`, wrapping around
    /// and ending on the current one.
    pub fn next_incomplete_index(&self) -> Option<usize> {
        let len = self.exercises.len();
        let current = self.current_exercise_index.min(len.saturating_sub(1));
        ((current + 1)..len)
            .chain(0..=current)
            .find(|&i| i < len && !self.is_exercise_completed(i))
    }

    fn any_resting(&self) -> bool {
        self.exercise_states.values().any(|s| s.is_resting)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ExerciseCompleted(ExerciseSessionRecord),
    HistoryEdited { exercise: String },
    RestExpired { exercise: String },
    SessionCompleted { training: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetOutcome {
    Resting { next_set: u32, rest_seconds: u32 },
    Completed,
    /// Precondition not met (not active, already completed, or still resting).
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Selected(usize),
    SessionCompleted,
    /// Unreachable while the session invariants hold.
    NoIncomplete,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_rest_seconds: u32,
    pub day_boundary: DayBoundary,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_rest_seconds: 90,
            day_boundary: DayBoundary::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseView {
    pub index: usize,
    pub name: String,
    pub title: String, // Custom title or the plan name
    pub note: Option<String>,
    pub muscle_group: Option<String>,
    pub video_link: Option<String>,
    pub status: ExerciseStatus,
    pub current_set: u32,
    pub total_sets: u32,
    pub weight: Option<f64>,
    pub repeats: Option<u32>,
    pub rest_seconds: u32,
    pub time_left: u32,
    pub countdown_cue: bool,
    pub can_finish_set: bool,
    pub sets_data: Vec<SetResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub training: String,
    pub current_exercise_index: usize,
    pub is_complete: bool,
    pub exercises: Vec<ExerciseView>,
}

pub struct SessionController {
    store: LocalStore,
    catalog: TrainingCatalog,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    state: Option<SessionState>,
    scheduler: RestScheduler,
    events: Vec<SessionEvent>,
}

fn timestamp_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl SessionController {
    /// Builds the controller, resuming a persisted session for the same plan if one
    /// exists.
    pub fn new(
        store: LocalStore,
        catalog: TrainingCatalog,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let restored = store
            .load_record::<SessionState>(KEY_ACTIVE_SESSION)
            .filter(|s| s.plan_id == catalog.plan_id)
            .filter(|s| {
                s.selected_training
                    .as_deref()
                    .is_some_and(|t| catalog.training(t).is_some())
            });
        let mut controller = Self {
            store,
            catalog,
            settings,
            clock,
            state: restored,
            scheduler: RestScheduler::new(),
            events: Vec::new(),
        };
        controller.sync_scheduler(controller.clock.now_ms());
        controller
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LocalStore {
        &mut self.store
    }

    /// Hands the store back, e.g. for `LocalStore::dispose`.
    pub fn into_store(self) -> LocalStore {
        self.store
    }

    pub fn catalog(&self) -> &TrainingCatalog {
        &self.catalog
    }

    /// Swaps in a new plan. A running session survives only if the plan id is the
    /// same and its training still exists.
    pub fn replace_catalog(&mut self, catalog: TrainingCatalog) -> Result<(), SessionError> {
        let keep = self.state.as_ref().is_some_and(|s| {
            s.plan_id == catalog.plan_id
                && s.selected_training
                    .as_deref()
                    .is_some_and(|t| catalog.training(t).is_some())
        });
        self.catalog = catalog;
        if !keep {
            if let Some(old) = self.state.take() {
                info!("Dropping session {} after plan change", old.session_id);
                self.scheduler.cancel(old.session_id);
            }
            self.persist()?;
        }
        Ok(())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: SessionSettings) {
        self.settings = settings;
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn exercise_state(&self, exercise: &str) -> Option<&ExerciseState> {
        self.state
            .as_ref()
            .and_then(|s| s.exercise_states.get(exercise))
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn day_key(&self, now_ms: i64) -> String {
        self.settings.day_boundary.day_key(timestamp_from_ms(now_ms))
    }

    fn active_training(&self) -> Result<&Training, SessionError> {
        let session = self.state.as_ref().ok_or(SessionError::NoActiveSession)?;
        let name = session
            .selected_training
            .as_deref()
            .ok_or(SessionError::NoActiveSession)?;
        self.catalog
            .training(name)
            .ok_or_else(|| SessionError::UnknownTraining(name.to_string()))
    }

    fn spec_for(&self, exercise: &str) -> Result<ExerciseSpec, SessionError> {
        self.active_training()?
            .exercise(exercise)
            .cloned()
            .ok_or_else(|| SessionError::UnknownExercise(exercise.to_string()))
    }

    fn exercise_mut(&mut self, exercise: &str) -> Result<&mut ExerciseState, SessionError> {
        self.state
            .as_mut()
            .ok_or(SessionError::NoActiveSession)?
            .exercise_states
            .get_mut(exercise)
            .ok_or_else(|| SessionError::UnknownExercise(exercise.to_string()))
    }

    fn persist(&self) -> Result<(), SessionError> {
        match &self.state {
            Some(state) => self.store.save_record(KEY_ACTIVE_SESSION, state)?,
            None => {
                self.store.remove_record(KEY_ACTIVE_SESSION)?;
            }
        }
        Ok(())
    }

    /// Keeps the 1 Hz task registered exactly while something is resting.
    fn sync_scheduler(&mut self, now_ms: i64) {
        let Some(session) = &self.state else {
            return;
        };
        if session.any_resting() && !session.is_complete {
            self.scheduler.schedule(session.session_id, TICK_PERIOD_MS, now_ms);
        } else {
            self.scheduler.cancel(session.session_id);
        }
    }

    fn resolve_for(&self, spec: &ExerciseSpec) -> ResolvedValues {
        let history = self.store.load_history();
        let saved_defaults = self.store.load_defaults();
        let saved = defaults::saved_defaults(&saved_defaults, &self.catalog.plan_id, &spec.name);
        defaults::resolve(spec, saved, history.entries(&spec.name))
    }

    /// Initializes a fresh session for `training`, discarding any current one.
    pub fn select_training(&mut self, training: &str) -> Result<&SessionState, SessionError> {
        let training = self
            .catalog
            .training(training)
            .cloned()
            .ok_or_else(|| SessionError::UnknownTraining(training.to_string()))?;
        let now = self.now_ms();
        let day_key = self.day_key(now);
        let history = self.store.load_history();
        let saved_defaults = self.store.load_defaults();
        let progress = self.store.load_progress();

        let mut exercise_states = BTreeMap::new();
        for spec in &training.exercises {
            let saved = defaults::saved_defaults(&saved_defaults, &self.catalog.plan_id, &spec.name);
            let resolved = defaults::resolve(spec, saved, history.entries(&spec.name));
            let mut state = ExerciseState::from_resolved(resolved);
            if let Some(done) = progress.completed_sets(&training.name, &spec.name, &day_key) {
                state.current_set = done.min(spec.number_of_sets);
                state.completed = done >= spec.number_of_sets;
            }
            exercise_states.insert(spec.name.clone(), state);
        }

        if let Some(old) = self.state.take() {
            self.scheduler.cancel(old.session_id);
        }
        let session = SessionState {
            session_id: Uuid::new_v4(),
            plan_id: self.catalog.plan_id.clone(),
            selected_training: Some(training.name.clone()),
            current_exercise_index: 0,
            exercises: training.exercises.iter().map(|e| e.name.clone()).collect(),
            exercise_states,
            is_complete: false,
        };
        info!(
            "Started session {} for training '{}' ({} exercises)",
            session.session_id,
            training.name,
            session.exercises.len()
        );
        self.state = Some(session);
        self.persist()?;
        self.state.as_ref().ok_or(SessionError::NoActiveSession)
    }

    /// NotStarted -> Active. Returns false when the exercise was not startable.
    pub fn start(&mut self, exercise: &str) -> Result<bool, SessionError> {
        let state = self.exercise_mut(exercise)?;
        if state.completed || state.is_active {
            debug!("Ignoring start of '{}' in status {}", exercise, state.status());
            return Ok(false);
        }
        state.is_active = true;
        self.persist()?;
        Ok(true)
    }

    /// Overrides the working weight/repeats for the next sets. Non-positive values
    /// clear the field.
    pub fn set_working_values(
        &mut self,
        exercise: &str,
        weight: Option<f64>,
        repeats: Option<u32>,
    ) -> Result<(), SessionError> {
        let state = self.exercise_mut(exercise)?;
        state.weight = weight.filter(|w| *w > 0.0);
        state.repeats = repeats.filter(|r| *r > 0);
        self.persist()
    }

    pub fn set_custom_rest_time(
        &mut self,
        exercise: &str,
        seconds: Option<u32>,
    ) -> Result<(), SessionError> {
        let state = self.exercise_mut(exercise)?;
        state.custom_rest_time = seconds.filter(|s| *s > 0);
        self.persist()
    }

    pub fn finish_set(&mut self, exercise: &str) -> Result<SetOutcome, SessionError> {
        let spec = self.spec_for(exercise)?;
        let now = self.now_ms();
        let default_rest = self.settings.default_rest_seconds;

        // A rest may have run out while nobody was ticking
        if self.exercise_mut(exercise)?.refresh_rest(now) {
            self.events.push(SessionEvent::RestExpired {
                exercise: exercise.to_string(),
            });
            self.sync_scheduler(now);
        }
        let state = self.exercise_mut(exercise)?;
        if !state.can_finish_set() {
            debug!(
                "Ignoring finish_set for '{}' (status {}, {}s rest left)",
                exercise,
                state.status(),
                state.time_left
            );
            return Ok(SetOutcome::Ignored);
        }

        let done = SetResult::new(state.weight, state.repeats);
        state.sets_data.push(done);
        let outcome = if state.current_set + 1 >= spec.number_of_sets {
            // Sets carried over from earlier today have no recorded values
            let carried = (spec.number_of_sets as usize).saturating_sub(state.sets_data.len());
            for _ in 0..carried {
                state.sets_data.insert(0, done);
            }
            state.mark_completed(spec.number_of_sets);
            SetOutcome::Completed
        } else {
            let rest = state
                .custom_rest_time
                .or(state.rest_time)
                .filter(|r| *r > 0)
                .unwrap_or(default_rest);
            state.current_set += 1;
            state.is_resting = true;
            state.start_timestamp = Some(now);
            state.rest_duration = Some(rest);
            state.time_left = rest;
            SetOutcome::Resting {
                next_set: state.current_set + 1,
                rest_seconds: rest,
            }
        };
        let snapshot = state.clone();

        self.record_progress(exercise, snapshot.current_set, now)?;
        if outcome == SetOutcome::Completed {
            self.record_completion(exercise, &snapshot, spec.number_of_sets, now)?;
        }
        self.sync_scheduler(now);
        self.persist()?;
        Ok(outcome)
    }

    /// Manual "end exercise": fills the remaining sets with the current target values
    /// and completes without resting.
    pub fn force_complete(&mut self, exercise: &str) -> Result<SetOutcome, SessionError> {
        let spec = self.spec_for(exercise)?;
        let now = self.now_ms();
        if self.exercise_state(exercise).is_some_and(|s| s.completed) {
            return Ok(SetOutcome::Ignored);
        }
        let resolved = self.resolve_for(&spec);

        let state = self.exercise_mut(exercise)?;
        let target = SetResult::new(
            state.weight.or(resolved.weight),
            state.repeats.or(resolved.repeats),
        );
        // Also covers sets carried over from earlier today
        let remaining = (spec.number_of_sets as usize).saturating_sub(state.sets_data.len());
        state
            .sets_data
            .extend(std::iter::repeat(target).take(remaining));
        state.mark_completed(spec.number_of_sets);
        let snapshot = state.clone();

        self.record_progress(exercise, snapshot.current_set, now)?;
        self.record_completion(exercise, &snapshot, spec.number_of_sets, now)?;
        self.sync_scheduler(now);
        self.persist()?;
        Ok(SetOutcome::Completed)
    }

    /// Replaces the sets of a completed exercise and rewrites today's history entry.
    pub fn edit_completed_sets(
        &mut self,
        exercise: &str,
        sets_data: Vec<SetResult>,
    ) -> Result<(), SessionError> {
        let now = self.now_ms();
        let sets: Vec<SetResult> = sets_data
            .into_iter()
            .map(|s| SetResult::new(s.weight, s.repeats))
            .collect();
        let state = self.exercise_mut(exercise)?;
        if !state.completed {
            return Err(SessionError::NotCompleted(exercise.to_string()));
        }
        state.sets_data = sets.clone();

        let mut history = self.store.load_history();
        let now_utc = timestamp_from_ms(now);
        let today = self.settings.day_boundary.date_of(now_utc);
        let updated = match self.settings.day_boundary {
            DayBoundary::Local => history.update_todays_entry(exercise, &sets, today, &Local),
            DayBoundary::Utc => history.update_todays_entry(exercise, &sets, today, &Utc),
        };
        if updated {
            self.store.save_history(&history)?;
            self.events.push(SessionEvent::HistoryEdited {
                exercise: exercise.to_string(),
            });
        } else {
            debug!("No history entry for '{}' today; only session sets edited", exercise);
        }
        self.persist()
    }

    /// Free navigation; does not start the exercise.
    pub fn select_exercise(&mut self, index: usize) -> Result<(), SessionError> {
        let session = self.state.as_mut().ok_or(SessionError::NoActiveSession)?;
        if index >= session.exercises.len() {
            return Err(SessionError::IndexOutOfRange(index));
        }
        session.current_exercise_index = index;
        self.persist()
    }

    pub fn advance(&mut self) -> Result<AdvanceOutcome, SessionError> {
        let now = self.now_ms();
        let session = self.state.as_mut().ok_or(SessionError::NoActiveSession)?;
        if session.is_complete {
            return Ok(AdvanceOutcome::SessionCompleted);
        }
        if session.all_completed() {
            session.is_complete = true;
            let training = session.selected_training.clone().unwrap_or_default();
            info!("Training '{}' completed", training);
            self.events.push(SessionEvent::SessionCompleted { training });
            self.sync_scheduler(now);
            self.persist()?;
            return Ok(AdvanceOutcome::SessionCompleted);
        }
        match session.next_incomplete_index() {
            Some(index) => {
                session.current_exercise_index = index;
                self.persist()?;
                Ok(AdvanceOutcome::Selected(index))
            }
            None => {
                error!("advance() found no incomplete exercise although the session is not complete");
                debug_assert!(false, "advance() invariant violated");
                Ok(AdvanceOutcome::NoIncomplete)
            }
        }
    }

    /// Recomputes every running rest from its timestamps. Same path for the 1 Hz
    /// tick and for resuming after suspension. Returns the exercises whose rest
    /// ended on this call.
    pub fn tick(&mut self) -> Result<Vec<String>, SessionError> {
        let now = self.now_ms();
        let Some(session) = self.state.as_mut() else {
            return Ok(Vec::new());
        };
        let mut expired = Vec::new();
        for (name, state) in &mut session.exercise_states {
            if state.refresh_rest(now) {
                expired.push(name.clone());
            }
        }
        let session_id = session.session_id;
        self.scheduler.mark_ran(session_id, now);
        for name in &expired {
            debug!("Rest over for '{}'", name);
            self.events.push(SessionEvent::RestExpired {
                exercise: name.clone(),
            });
        }
        self.sync_scheduler(now);
        if !expired.is_empty() {
            self.persist()?;
        }
        Ok(expired)
    }

    pub fn resume(&mut self) -> Result<Vec<String>, SessionError> {
        self.tick()
    }

    pub fn needs_tick(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| self.scheduler.is_scheduled(s.session_id))
    }

    pub fn is_tick_due(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| self.scheduler.is_due(s.session_id, self.now_ms()))
    }

    /// Discards the session and today's progress for its training. History already
    /// written stays.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if let Some(old) = self.state.take() {
            self.scheduler.cancel(old.session_id);
            if let Some(training) = old.selected_training {
                let mut progress = self.store.load_progress();
                progress.clear_training(&training);
                self.store.save_progress(&progress)?;
            }
        }
        self.persist()
    }

    /// Clears a finished session. Returns false if the session is not complete.
    pub fn acknowledge_completion(&mut self) -> Result<bool, SessionError> {
        match &self.state {
            Some(session) if session.is_complete => {
                self.scheduler.cancel(session.session_id);
                self.state = None;
                self.persist()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn record_progress(&self, exercise: &str, completed_sets: u32, now_ms: i64) -> Result<(), SessionError> {
        let training = self.active_training()?.name.clone();
        let mut progress = self.store.load_progress();
        progress.record_sets(&training, exercise, completed_sets, &self.day_key(now_ms));
        self.store.save_progress(&progress)?;
        Ok(())
    }

    fn record_completion(
        &mut self,
        exercise: &str,
        state: &ExerciseState,
        total_sets: u32,
        now_ms: i64,
    ) -> Result<(), SessionError> {
        let training = self.active_training()?.name.clone();
        let first = state.sets_data.first().copied().unwrap_or_default();
        let entry = HistoryEntry {
            date: timestamp_from_ms(now_ms),
            weight: first.weight,
            repeats: first.repeats,
            rest_time: state.custom_rest_time.or(state.rest_time),
            completed_sets: state.current_set,
            total_sets,
            sets_data: state.sets_data.clone(),
        };
        let mut history = self.store.load_history();
        history.record_completion(exercise, entry.clone());
        self.store.save_history(&history)?;
        info!("Exercise '{}' completed ({} sets)", exercise, state.sets_data.len());
        self.events
            .push(SessionEvent::ExerciseCompleted(ExerciseSessionRecord {
                plan_id: self.catalog.plan_id.clone(),
                training,
                exercise: exercise.to_string(),
                entry,
            }));
        Ok(())
    }

    /// Read-only view for the presentation layer, with rest time recomputed for "now".
    pub fn view(&self) -> Option<SessionView> {
        let session = self.state.as_ref()?;
        let training = self.active_training().ok()?;
        let now = self.now_ms();
        let custom = self.store.load_custom_exercises();
        let cue_enabled = self.store.load_volume() > 0;

        let exercises = session
            .exercises
            .iter()
            .enumerate()
            .filter_map(|(index, name)| {
                let spec = training.exercise(name)?;
                let state = session.exercise_states.get(name)?;
                let overrides = custom.get(name);
                let time_left = state.remaining_at(now);
                let mut fresh = state.clone();
                fresh.time_left = time_left;
                Some(ExerciseView {
                    index,
                    name: name.clone(),
                    title: overrides
                        .and_then(|o| o.title.clone())
                        .unwrap_or_else(|| name.clone()),
                    note: overrides
                        .and_then(|o| o.note.clone())
                        .or_else(|| spec.note.clone()),
                    muscle_group: spec.muscle_group.clone(),
                    video_link: spec.video_link.clone(),
                    status: state.status(),
                    current_set: state.current_set,
                    total_sets: spec.number_of_sets,
                    weight: state.weight,
                    repeats: state.repeats,
                    rest_seconds: state
                        .custom_rest_time
                        .or(state.rest_time)
                        .unwrap_or(self.settings.default_rest_seconds),
                    time_left,
                    countdown_cue: cue_enabled && timer::in_countdown_tail(time_left),
                    can_finish_set: fresh.can_finish_set(),
                    sets_data: state.sets_data.clone(),
                })
            })
            .collect();

        Some(SessionView {
            training: training.name.clone(),
            current_exercise_index: session.current_exercise_index,
            is_complete: session.is_complete,
            exercises,
        })
    }
}

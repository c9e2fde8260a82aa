use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use session_coach_lib::{
    AdvanceOutcome, AppService, Clock, Config, DayBoundary, ExerciseDefaults, ExerciseSessionRecord,
    ExerciseSpec, ExerciseStatus, HistoryEntry, LocalStore, ManualClock, RemoteStore,
    SessionError, SessionEvent, SetOutcome, SetResult, SyncEngine, SyncIntent, TraineeRecord, Training,
    TrainingCatalog,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn spec(name: &str, sets: u32, rest: u32) -> ExerciseSpec {
    ExerciseSpec {
        name: name.to_string(),
        number_of_sets: sets,
        min_rest: rest,
        max_rest: rest,
        min_reps: 8,
        max_reps: 12,
        note: Some(format!("{name} note")),
        muscle_group: None,
        video_link: None,
    }
}

fn test_plan(plan_id: &str) -> TrainingCatalog {
    TrainingCatalog {
        plan_id: plan_id.to_string(),
        trainings: vec![Training {
            name: "Push".to_string(),
            exercises: vec![spec("Bench", 3, 60), spec("Dips", 2, 45), spec("Fly", 1, 30)],
        }],
    }
}

// Helper function to create a test service with in-memory database
fn create_test_service(clock: &ManualClock, sync: Option<SyncEngine>) -> Result<AppService> {
    let store = LocalStore::in_memory()?;
    let config = Config {
        day_boundary: DayBoundary::Utc,
        default_rest_seconds: 90,
        ..Default::default()
    };
    let mut service = AppService::from_parts(
        config,
        "test_config.toml".into(),
        ":memory:".into(),
        store,
        Arc::new(clock.clone()),
        sync,
    );
    service.set_training_plan(test_plan("plan-a"))?;
    Ok(service)
}

fn clock_now() -> ManualClock {
    ManualClock::new(Utc::now().timestamp_millis())
}

/// Finishes one set, waiting out the rest that follows it.
fn finish_and_rest(service: &mut AppService, clock: &ManualClock, exercise: &str) -> Result<SetOutcome> {
    let (outcome, _) = service.with_session(|c| c.finish_set(exercise))?;
    if let SetOutcome::Resting { rest_seconds, .. } = outcome {
        clock.advance_secs(i64::from(rest_seconds));
        service.with_session(|c| c.tick())?;
    }
    Ok(outcome)
}

#[test]
fn test_finishing_every_set_completes_each_exercise() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;

    for (name, sets) in [("Bench", 3usize), ("Dips", 2), ("Fly", 1)] {
        service.with_session(|c| c.start(name))?;
        for _ in 0..sets {
            finish_and_rest(&mut service, &clock, name)?;
        }
        let state = service.controller().exercise_state(name).unwrap();
        assert!(state.completed, "{name} should be completed");
        assert_eq!(state.sets_data.len(), sets);
        assert_eq!(state.status(), ExerciseStatus::Completed);
    }
    Ok(())
}

#[test]
fn test_three_set_scenario_records_single_history_entry() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.set_working_values("Bench", Some(60.0), Some(10)))?;

    let first = finish_and_rest(&mut service, &clock, "Bench")?;
    assert_eq!(first, SetOutcome::Resting { next_set: 2, rest_seconds: 60 });
    finish_and_rest(&mut service, &clock, "Bench")?;
    let (last, events) = service.with_session(|c| c.finish_set("Bench"))?;
    assert_eq!(last, SetOutcome::Completed);

    let state = service.controller().exercise_state("Bench").unwrap();
    assert!(state.completed);
    assert!(!state.is_active && !state.is_resting);
    assert_eq!(state.current_set, 3);
    assert_eq!(state.sets_data.len(), 3);

    let history = service.history("Bench");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].date.date_naive(), Utc::now().date_naive());
    assert_eq!(history[0].completed_sets, 3);
    assert_eq!(history[0].total_sets, 3);
    assert_eq!(history[0].weight, Some(60.0));

    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ExerciseCompleted(r) if r.exercise == "Bench")));
    Ok(())
}

#[test]
fn test_finish_set_is_ignored_while_rest_is_running() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;

    // Not started yet
    let (outcome, _) = service.with_session(|c| c.finish_set("Bench"))?;
    assert_eq!(outcome, SetOutcome::Ignored);

    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;
    clock.advance_secs(59);
    let (outcome, _) = service.with_session(|c| c.finish_set("Bench"))?;
    assert_eq!(outcome, SetOutcome::Ignored);
    assert_eq!(service.controller().exercise_state("Bench").unwrap().sets_data.len(), 1);

    // Rest has run out even though nothing ticked
    clock.advance_secs(1);
    let (outcome, _) = service.with_session(|c| c.finish_set("Bench"))?;
    assert_eq!(outcome, SetOutcome::Resting { next_set: 3, rest_seconds: 60 });
    Ok(())
}

#[test]
fn test_suspended_countdown_matches_steady_ticks() -> Result<()> {
    let steady_clock = clock_now();
    let jump_clock = ManualClock::new(steady_clock.now_ms());
    let mut steady = create_test_service(&steady_clock, None)?;
    let mut jumped = create_test_service(&jump_clock, None)?;

    for service in [&mut steady, &mut jumped] {
        service.with_session(|c| c.select_training("Push").map(|_| ()))?;
        service.with_session(|c| c.start("Bench"))?;
        service.with_session(|c| c.finish_set("Bench"))?;
    }

    for _ in 0..10 {
        steady_clock.advance_secs(1);
        steady.with_session(|c| c.tick())?;
    }
    jump_clock.advance_secs(10); // Process suspended, no ticks at all
    jumped.with_session(|c| c.resume())?;

    let steady_left = steady.controller().exercise_state("Bench").unwrap().time_left;
    let jumped_left = jumped.controller().exercise_state("Bench").unwrap().time_left;
    assert_eq!(steady_left, 50);
    assert_eq!(steady_left, jumped_left);
    Ok(())
}

#[test]
fn test_rest_expiry_fires_exactly_once() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;
    assert!(service.controller().needs_tick());

    clock.advance_secs(75);
    let (expired, events) = service.with_session(|c| c.tick())?;
    assert_eq!(expired, vec!["Bench".to_string()]);
    assert_eq!(events.len(), 1);
    let (expired, events) = service.with_session(|c| c.tick())?;
    assert!(expired.is_empty() && events.is_empty());

    let state = service.controller().exercise_state("Bench").unwrap();
    assert_eq!(state.status(), ExerciseStatus::Active);
    assert!(state.start_timestamp.is_none() && state.rest_duration.is_none());
    assert!(!service.controller().needs_tick());
    Ok(())
}

#[test]
fn test_finish_set_reports_rest_that_ran_out() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;

    clock.advance_secs(60);
    let (outcome, events) = service.with_session(|c| c.finish_set("Bench"))?;
    assert_eq!(outcome, SetOutcome::Resting { next_set: 3, rest_seconds: 60 });
    assert_eq!(events, vec![SessionEvent::RestExpired { exercise: "Bench".into() }]);

    // The new rest has just started; nothing else expires
    let (expired, events) = service.with_session(|c| c.tick())?;
    assert!(expired.is_empty() && events.is_empty());
    assert!(service.controller().needs_tick());
    Ok(())
}

#[test]
fn test_countdown_cue_respects_volume() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;

    clock.advance_secs(56);
    let bench = |s: &AppService| s.session_view().unwrap().exercises[0].clone();
    assert_eq!(bench(&service).time_left, 4);
    assert!(bench(&service).countdown_cue);
    assert!(!bench(&service).can_finish_set);

    service.set_volume(0)?;
    assert!(!bench(&service).countdown_cue);
    Ok(())
}

#[test]
fn test_saved_default_wins_over_history() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;

    let mut history = service.store().load_history();
    history.record_completion(
        "Bench",
        HistoryEntry {
            date: Utc::now() - chrono::Duration::days(2),
            weight: Some(35.0),
            repeats: Some(6),
            rest_time: Some(60),
            completed_sets: 3,
            total_sets: 3,
            sets_data: vec![SetResult::new(Some(40.0), Some(9))],
        },
    );
    service.store().save_history(&history)?;

    service.save_exercise_defaults(
        "Bench",
        ExerciseDefaults { weight: Some(50.0), ..Default::default() },
    )?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    let state = service.controller().exercise_state("Bench").unwrap();
    assert_eq!(state.weight, Some(50.0));
    assert_eq!(state.repeats, Some(9));
    assert_eq!(state.rest_time, Some(60));

    service.store().save_defaults(&BTreeMap::new())?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    assert_eq!(service.controller().exercise_state("Bench").unwrap().weight, Some(40.0));

    // Defaults saved under another plan are invisible here
    let mut other = BTreeMap::new();
    other.insert(
        "plan-b".to_string(),
        BTreeMap::from([(
            "Bench".to_string(),
            ExerciseDefaults { weight: Some(99.0), ..Default::default() },
        )]),
    );
    service.store().save_defaults(&other)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    assert_eq!(service.controller().exercise_state("Bench").unwrap().weight, Some(40.0));
    Ok(())
}

#[test]
fn test_advance_scans_forward_then_wraps() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.force_complete("Bench"))?;
    service.with_session(|c| c.force_complete("Fly"))?;

    service.with_session(|c| c.select_exercise(0))?;
    let (outcome, _) = service.with_session(|c| c.advance())?;
    assert_eq!(outcome, AdvanceOutcome::Selected(1));

    service.with_session(|c| c.select_exercise(2))?;
    let (outcome, _) = service.with_session(|c| c.advance())?;
    assert_eq!(outcome, AdvanceOutcome::Selected(1));
    assert_eq!(service.controller().state().unwrap().current_exercise_index, 1);

    let err = service.with_session(|c| c.select_exercise(7)).unwrap_err();
    assert!(err.to_string().contains("out of range"));
    Ok(())
}

#[test]
fn test_advance_completes_session_when_everything_is_done() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    for name in ["Bench", "Dips", "Fly"] {
        service.with_session(|c| c.force_complete(name))?;
    }
    let (outcome, events) = service.with_session(|c| c.advance())?;
    assert_eq!(outcome, AdvanceOutcome::SessionCompleted);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::SessionCompleted { training } if training == "Push")));
    assert!(service.session_view().unwrap().is_complete);

    let (cleared, _) = service.with_session(|c| c.acknowledge_completion())?;
    assert!(cleared);
    assert!(service.controller().state().is_none());
    Ok(())
}

#[test]
fn test_advance_on_completed_session_congratulates_once() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    for name in ["Bench", "Dips", "Fly"] {
        service.with_session(|c| c.force_complete(name))?;
    }
    let (_, first) = service.with_session(|c| c.advance())?;
    let (outcome, second) = service.with_session(|c| c.advance())?;
    assert_eq!(first, vec![SessionEvent::SessionCompleted { training: "Push".into() }]);
    assert_eq!(outcome, AdvanceOutcome::SessionCompleted);
    assert!(second.is_empty());
    Ok(())
}

#[test]
fn test_force_complete_fills_remaining_sets() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.set_working_values("Bench", Some(70.0), Some(5)))?;
    service.with_session(|c| c.finish_set("Bench"))?;

    // Still resting: force completion skips the rest
    let (outcome, _) = service.with_session(|c| c.force_complete("Bench"))?;
    assert_eq!(outcome, SetOutcome::Completed);
    let state = service.controller().exercise_state("Bench").unwrap();
    assert_eq!(state.sets_data.len(), 3);
    assert!(state.sets_data.iter().all(|s| s.weight == Some(70.0) && s.repeats == Some(5)));
    assert!(!state.is_resting);
    assert!(!service.controller().needs_tick());

    // Untouched exercise falls back to resolved defaults (min reps, no weight)
    service.with_session(|c| c.force_complete("Dips"))?;
    let dips = service.controller().exercise_state("Dips").unwrap();
    assert_eq!(dips.sets_data, vec![SetResult::new(None, Some(8)); 2]);

    let (again, _) = service.with_session(|c| c.force_complete("Dips"))?;
    assert_eq!(again, SetOutcome::Ignored);
    Ok(())
}

#[test]
fn test_edit_completed_sets_keeps_one_entry_for_today() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;

    let err = service
        .with_session(|c| c.edit_completed_sets("Dips", vec![]))
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<SessionError>(), Some(SessionError::NotCompleted(_))));

    service.with_session(|c| c.force_complete("Dips"))?;
    let edited = vec![SetResult::new(Some(10.0), Some(12)), SetResult::new(Some(12.5), Some(10))];
    let (_, events) = service.with_session(|c| c.edit_completed_sets("Dips", edited.clone()))?;
    assert_eq!(events, vec![SessionEvent::HistoryEdited { exercise: "Dips".into() }]);

    let history = service.history("Dips");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sets_data, edited);
    assert_eq!(history[0].weight, Some(10.0));
    assert_eq!(history[0].completed_sets, 2);
    assert_eq!(service.controller().exercise_state("Dips").unwrap().sets_data, edited);
    Ok(())
}

#[test]
fn test_progress_carries_over_on_reinitialization() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;
    service.with_session(|c| c.force_complete("Fly"))?;

    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    let bench = service.controller().exercise_state("Bench").unwrap();
    assert_eq!(bench.current_set, 1);
    assert!(!bench.completed && !bench.is_active);
    assert!(service.controller().exercise_state("Fly").unwrap().completed);

    // Next day: progress is stale and ignored
    clock.advance_secs(24 * 60 * 60);
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    assert_eq!(service.controller().exercise_state("Bench").unwrap().current_set, 0);
    assert!(!service.controller().exercise_state("Fly").unwrap().completed);
    Ok(())
}

#[test]
fn test_carried_over_sets_are_filled_in_history() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;
    service.with_session(|c| c.start("Dips"))?;
    service.with_session(|c| c.finish_set("Dips"))?;

    // Same day, fresh session: one set of each is already done
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.set_working_values("Bench", Some(50.0), Some(8)))?;
    finish_and_rest(&mut service, &clock, "Bench")?;
    let (outcome, _) = service.with_session(|c| c.finish_set("Bench"))?;
    assert_eq!(outcome, SetOutcome::Completed);

    let bench = service.history("Bench");
    assert_eq!(bench.len(), 1);
    assert_eq!(bench[0].completed_sets, 3);
    assert_eq!(bench[0].sets_data, vec![SetResult::new(Some(50.0), Some(8)); 3]);

    service.with_session(|c| c.force_complete("Dips"))?;
    let dips = service.history("Dips");
    assert_eq!(dips[0].completed_sets, 2);
    assert_eq!(dips[0].sets_data.len(), 2);
    Ok(())
}

#[test]
fn test_reset_discards_session_and_todays_progress() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.force_complete("Fly"))?;
    service.with_session(|c| c.reset())?;
    assert!(service.controller().state().is_none());
    assert_eq!(service.history("Fly").len(), 1); // History stays

    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    assert!(!service.controller().exercise_state("Fly").unwrap().completed);
    Ok(())
}

#[test]
fn test_switching_exercise_keeps_rest_running() -> Result<()> {
    let clock = clock_now();
    let mut service = create_test_service(&clock, None)?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.start("Bench"))?;
    service.with_session(|c| c.finish_set("Bench"))?;
    service.with_session(|c| c.select_exercise(1))?;
    clock.advance_secs(20);
    service.with_session(|c| c.tick())?;
    service.with_session(|c| c.select_exercise(0))?;
    let bench = service.controller().exercise_state("Bench").unwrap();
    assert!(bench.is_resting);
    assert_eq!(bench.time_left, 40);
    Ok(())
}

#[test]
fn test_session_survives_process_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("session.sqlite");
    let clock = clock_now();
    let config = Config { day_boundary: DayBoundary::Utc, ..Default::default() };

    let mut first = AppService::from_parts(
        config.clone(),
        dir.path().join("config.toml"),
        db_path.clone(),
        LocalStore::init(&db_path)?,
        Arc::new(clock.clone()),
        None,
    );
    first.set_training_plan(test_plan("plan-a"))?;
    first.with_session(|c| c.select_training("Push").map(|_| ()))?;
    first.with_session(|c| c.start("Bench"))?;
    first.with_session(|c| c.finish_set("Bench"))?;
    first.dispose()?;

    clock.advance_secs(30);
    let mut second = AppService::from_parts(
        config,
        dir.path().join("config.toml"),
        db_path.clone(),
        LocalStore::init(&db_path)?,
        Arc::new(clock.clone()),
        None,
    );
    assert!(second.controller().needs_tick());
    let view = second.session_view().unwrap();
    assert_eq!(view.exercises[0].time_left, 30);

    clock.advance_secs(30);
    let (expired, _) = second.with_session(|c| c.resume())?;
    assert_eq!(expired, vec!["Bench".to_string()]);

    // A different plan id drops the stored session
    second.set_training_plan(test_plan("plan-b"))?;
    assert!(second.controller().state().is_none());
    Ok(())
}

// --- Sync ---

#[derive(Default)]
struct FakeRemote {
    record: Mutex<TraineeRecord>,
    plans: Mutex<Vec<TrainingCatalog>>,
    sessions: Mutex<Vec<ExerciseSessionRecord>>,
    resyncs: Mutex<Vec<TraineeRecord>>,
    fail: AtomicBool,
}

impl FakeRemote {
    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("server unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch_trainee_record(&self) -> Result<TraineeRecord> {
        self.check()?;
        Ok(self.record.lock().unwrap().clone())
    }

    async fn push_trainee_record(&self, record: &TraineeRecord) -> Result<()> {
        self.check()?;
        self.resyncs.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn push_exercise_session(&self, record: &ExerciseSessionRecord) -> Result<()> {
        self.check()?;
        self.sessions.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn fetch_training_plans(&self) -> Result<Vec<TrainingCatalog>> {
        self.check()?;
        Ok(self.plans.lock().unwrap().clone())
    }
}

#[tokio::test]
async fn test_completion_pushes_session_and_full_resync() -> Result<()> {
    let clock = clock_now();
    let remote = Arc::new(FakeRemote::default());
    let mut service = create_test_service(&clock, Some(SyncEngine::new(remote.clone())))?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.force_complete("Fly"))?;

    let stats = service.flush_sync().await.unwrap();
    assert_eq!(stats.pushed, 2);
    assert_eq!(stats.failed, 0);

    let sessions = remote.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].exercise, "Fly");
    assert_eq!(sessions[0].plan_id, "plan-a");
    let resyncs = remote.resyncs.lock().unwrap();
    assert_eq!(resyncs.len(), 1);
    assert_eq!(resyncs[0].history["Fly"].len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_push_failure_keeps_local_state() -> Result<()> {
    let clock = clock_now();
    let remote = Arc::new(FakeRemote::default());
    remote.fail.store(true, Ordering::SeqCst);
    let mut service = create_test_service(&clock, Some(SyncEngine::new(remote.clone())))?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    let (outcome, _) = service.with_session(|c| c.force_complete("Fly"))?;
    assert_eq!(outcome, SetOutcome::Completed);

    let stats = service.flush_sync().await.unwrap();
    assert_eq!(stats.failed, 2);
    assert_eq!(service.sync_engine().unwrap().pending(), 0); // Dropped, not retried
    assert_eq!(service.history("Fly").len(), 1);
    assert!(service.controller().exercise_state("Fly").unwrap().completed);
    Ok(())
}

#[tokio::test]
async fn test_bootstrap_replaces_local_state_with_server_record() -> Result<()> {
    let clock = clock_now();
    let remote = Arc::new(FakeRemote::default());
    let server_entry = HistoryEntry {
        date: Utc::now() - chrono::Duration::days(3),
        weight: Some(20.0),
        repeats: Some(12),
        rest_time: Some(45),
        completed_sets: 2,
        total_sets: 2,
        sets_data: vec![SetResult::new(Some(22.5), Some(12)); 2],
    };
    *remote.record.lock().unwrap() = TraineeRecord {
        history: BTreeMap::from([("Dips".to_string(), vec![server_entry])]),
        first_time_completed: true,
        ..Default::default()
    };
    *remote.plans.lock().unwrap() = vec![test_plan("plan-server")];

    let mut service = create_test_service(&clock, Some(SyncEngine::new(remote.clone())))?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.force_complete("Fly"))?; // Local-only history
    service.flush_sync().await;
    let dir = tempfile::tempdir()?;
    service.config_path = dir.path().join("config.toml");

    let summary = service.bootstrap().await?.unwrap();
    assert_eq!(summary.exercises_with_history, 1);
    assert!(service.config.sync.last_sync_timestamp.is_some());
    assert!(service.first_time_completed());
    assert!(service.history("Fly").is_empty()); // Server wins wholesale
    assert_eq!(service.history("Dips").len(), 1);
    assert_eq!(service.catalog().plan_id, "plan-server");

    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    assert_eq!(service.controller().exercise_state("Dips").unwrap().weight, Some(22.5));
    Ok(())
}

#[tokio::test]
async fn test_bootstrap_failure_leaves_local_data() -> Result<()> {
    let clock = clock_now();
    let remote = Arc::new(FakeRemote::default());
    remote.fail.store(true, Ordering::SeqCst);
    let mut service = create_test_service(&clock, Some(SyncEngine::new(remote.clone())))?;
    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    service.with_session(|c| c.force_complete("Fly"))?;

    let dir = tempfile::tempdir()?;
    service.config_path = dir.path().join("config.toml");
    assert!(service.bootstrap().await?.is_none());
    assert_eq!(service.history("Fly").len(), 1);
    assert_eq!(service.catalog().plan_id, "plan-a");
    Ok(())
}

#[tokio::test]
async fn test_first_time_setup_saves_defaults_and_flag() -> Result<()> {
    let clock = clock_now();
    let remote = Arc::new(FakeRemote::default());
    let mut service = create_test_service(&clock, Some(SyncEngine::new(remote.clone())))?;
    assert!(!service.first_time_completed());

    let initial = BTreeMap::from([
        ("Bench".to_string(), ExerciseDefaults { weight: Some(45.0), ..Default::default() }),
        ("Dips".to_string(), ExerciseDefaults { weight: Some(0.0), ..Default::default() }),
    ]);
    service.complete_first_time_setup(&initial)?;
    assert!(service.first_time_completed());

    service.with_session(|c| c.select_training("Push").map(|_| ()))?;
    assert_eq!(service.controller().exercise_state("Bench").unwrap().weight, Some(45.0));
    assert_eq!(service.controller().exercise_state("Dips").unwrap().weight, None);

    service.flush_sync().await;
    let resyncs = remote.resyncs.lock().unwrap();
    assert_eq!(resyncs.len(), 1);
    assert!(resyncs[0].first_time_completed);
    assert_eq!(resyncs[0].defaults["plan-a"]["Bench"].weight, Some(45.0));
    Ok(())
}

/// Counts how many pushes are on the wire at once.
#[derive(Default)]
struct SlowRemote {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: Mutex<Vec<&'static str>>,
}

impl SlowRemote {
    async fn push(&self, what: &'static str) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(what);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for SlowRemote {
    async fn fetch_trainee_record(&self) -> Result<TraineeRecord> {
        Ok(TraineeRecord::default())
    }

    async fn push_trainee_record(&self, _record: &TraineeRecord) -> Result<()> {
        self.push("resync").await
    }

    async fn push_exercise_session(&self, _record: &ExerciseSessionRecord) -> Result<()> {
        self.push("session").await
    }

    async fn fetch_training_plans(&self) -> Result<Vec<TrainingCatalog>> {
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_waits_for_running_drain() -> Result<()> {
    let remote = Arc::new(SlowRemote::default());
    let engine = SyncEngine::new(remote.clone());
    engine.enqueue(SyncIntent::ExerciseSession(ExerciseSessionRecord {
        plan_id: "plan-a".into(),
        training: "Push".into(),
        exercise: "Bench".into(),
        entry: HistoryEntry {
            date: Utc::now(),
            weight: Some(60.0),
            repeats: Some(10),
            rest_time: Some(60),
            completed_sets: 3,
            total_sets: 3,
            sets_data: vec![SetResult::new(Some(60.0), Some(10)); 3],
        },
    }));
    engine.enqueue(SyncIntent::FullResync(TraineeRecord::default()));
    engine.kick();

    let stats = engine.flush().await;
    assert_eq!(stats.pushed, 2);
    assert_eq!(engine.pending(), 0);
    assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(*remote.completed.lock().unwrap(), vec!["session", "resync"]);
    Ok(())
}

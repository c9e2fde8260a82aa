use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// --- Declare modules ---
mod config;
pub mod db;
pub mod defaults;
pub mod history;
pub mod models;
pub mod progress;
pub mod session;
pub mod sync;
pub mod sync_client;
pub mod timer;

// --- Expose public types ---
pub use config::{
    get_config_path as get_config_path_util, load as load_config_util, parse_color,
    save as save_config_util, Config, Error as ConfigError, StandardColor, SyncConfig, Theme,
    Units,
};
pub use db::{get_db_path as get_db_path_util, DbError, LocalStore};
pub use history::ExerciseHistory;
pub use models::{
    CustomExerciseOverride, DailyProgress, ExerciseDefaults, ExerciseSessionRecord, ExerciseSpec,
    HistoryEntry, SetResult, TraineeRecord, Training, TrainingCatalog,
};
pub use progress::{DayBoundary, ProgressLog};
pub use session::{
    AdvanceOutcome, ExerciseState, ExerciseStatus, ExerciseView, SessionController, SessionError,
    SessionEvent, SessionSettings, SessionState, SessionView, SetOutcome,
};
pub use sync::{PullSummary, SyncEngine, SyncError, SyncIntent, SyncStats};
pub use sync_client::{RemoteStore, SyncClient};
pub use timer::{Clock, ManualClock, SystemClock};

pub struct AppService {
    pub config: Config,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    controller: SessionController,
    sync: Option<SyncEngine>,
}

fn session_settings(config: &Config) -> SessionSettings {
    SessionSettings {
        default_rest_seconds: config.default_rest_seconds,
        day_boundary: config.day_boundary,
    }
}

fn sync_engine_from(config: &Config) -> Option<SyncEngine> {
    match (&config.sync.server_url, &config.sync.trainee_id) {
        (Some(url), Some(trainee)) => Some(SyncEngine::new(Arc::new(SyncClient::new(
            url.clone(),
            trainee.clone(),
        )))),
        _ => None,
    }
}

impl AppService {
    /// Initializes the application service.
    /// # Errors
    /// Returns `anyhow::Error` if config/db path determination, loading, or initialization fails.
    pub fn initialize() -> Result<Self> {
        let config_path =
            config::get_config_path().context("Failed to determine configuration file path")?;
        let config = config::load(&config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?;

        let db_path = db::get_db_path().context("Failed to determine database path")?;
        let store = LocalStore::init(&db_path)
            .with_context(|| format!("Failed to open database at {db_path:?}"))?;

        let sync = sync_engine_from(&config);
        Ok(Self::from_parts(
            config,
            config_path,
            db_path,
            store,
            Arc::new(SystemClock),
            sync,
        ))
    }

    /// Assembles a service from explicit parts (tests, embedding hosts).
    pub fn from_parts(
        config: Config,
        config_path: PathBuf,
        db_path: PathBuf,
        store: LocalStore,
        clock: Arc<dyn Clock>,
        sync: Option<SyncEngine>,
    ) -> Self {
        let catalog = store.load_training_plan().unwrap_or_default();
        let controller = SessionController::new(store, catalog, session_settings(&config), clock);
        Self {
            config,
            config_path,
            db_path,
            controller,
            sync,
        }
    }

    /// Closes the local store.
    /// # Errors
    /// Returns `DbError` if the connection cannot be closed cleanly.
    pub fn dispose(self) -> Result<(), DbError> {
        self.controller.into_store().dispose()
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Saves the current configuration state.
    /// # Errors
    /// Returns `ConfigError` if saving fails.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        config::save(&self.config_path, &self.config)
    }

    /// # Errors
    /// - `ConfigError::InvalidRestTime` if `seconds` is 0.
    /// - `ConfigError` variants if saving fails.
    pub fn set_default_rest(&mut self, seconds: u32) -> Result<(), ConfigError> {
        if seconds == 0 {
            return Err(ConfigError::InvalidRestTime(seconds));
        }
        self.config.default_rest_seconds = seconds;
        self.controller.set_settings(session_settings(&self.config));
        self.save_config()
    }

    /// # Errors
    /// Returns `ConfigError` variants if saving fails.
    pub fn set_day_boundary(&mut self, boundary: DayBoundary) -> Result<(), ConfigError> {
        self.config.day_boundary = boundary;
        self.controller.set_settings(session_settings(&self.config));
        self.save_config()
    }

    /// # Errors
    /// Returns `ConfigError` variants if saving fails.
    pub fn set_units(&mut self, units: Units) -> Result<(), ConfigError> {
        self.config.units = units;
        self.save_config()
    }

    /// Configures (or clears, with `None`) the sync server.
    /// # Errors
    /// Returns `ConfigError` variants if saving fails.
    pub fn set_sync_server(
        &mut self,
        url: Option<String>,
        trainee_id: Option<String>,
    ) -> Result<(), ConfigError> {
        self.config.sync.server_url = url.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self.config.sync.trainee_id = trainee_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.sync = sync_engine_from(&self.config);
        self.save_config()
    }

    pub fn sync_engine(&self) -> Option<&SyncEngine> {
        self.sync.as_ref()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn store(&self) -> &LocalStore {
        self.controller.store()
    }

    pub fn catalog(&self) -> &TrainingCatalog {
        self.controller.catalog()
    }

    // --- Plan ---

    /// Stores `catalog` as the active plan.
    /// # Errors
    /// Returns an error if the plan has no id or writing it fails.
    pub fn set_training_plan(&mut self, catalog: TrainingCatalog) -> Result<()> {
        if catalog.plan_id.trim().is_empty() {
            bail!("Training plan must have a plan id.");
        }
        self.store()
            .save_training_plan(&catalog)
            .context("Failed to store training plan")?;
        self.controller
            .replace_catalog(catalog)
            .context("Failed to switch training plan")?;
        Ok(())
    }

    /// Reads a plan from a JSON or TOML file and makes it the active plan.
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn import_plan(&mut self, path: &Path) -> Result<&TrainingCatalog> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {path:?}"))?;
        let catalog: TrainingCatalog = if path.extension().is_some_and(|e| e == "toml") {
            toml::from_str(&content).with_context(|| format!("Failed to parse TOML plan {path:?}"))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON plan {path:?}"))?
        };
        self.set_training_plan(catalog)?;
        Ok(self.catalog())
    }

    // --- Sync ---

    /// Pulls the server record and plan, replacing local state. Must run before a
    /// session is initialized. Sync failures are logged and reported as `Ok(None)`.
    /// # Errors
    /// Returns an error only if a pulled plan cannot be stored locally.
    pub async fn bootstrap(&mut self) -> Result<Option<PullSummary>> {
        let Some(engine) = self.sync.clone() else {
            return Ok(None);
        };
        let summary = match engine.pull_and_replace(self.controller.store_mut()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Start-up pull failed, continuing with local data: {}", e);
                None
            }
        };
        match engine.pull_training_plan(self.controller.store()).await {
            Ok(Some(plan)) => self.set_training_plan(plan)?,
            Ok(None) => {}
            Err(e) => warn!("Failed to pull training plan: {}", e),
        }
        if summary.is_some() {
            self.config.sync.last_sync_timestamp = Some(chrono::Utc::now());
            if let Err(e) = self.save_config() {
                warn!("Failed to record sync time: {}", e);
            }
        }
        Ok(summary)
    }

    /// Queues a full resync of local state.
    /// # Errors
    /// Returns `ConfigError::SyncNotConfigured` without a server.
    pub fn queue_full_resync(&self) -> Result<(), ConfigError> {
        let engine = self
            .sync
            .as_ref()
            .ok_or_else(|| ConfigError::SyncNotConfigured(self.config_path.clone()))?;
        engine.enqueue(SyncIntent::FullResync(self.store().trainee_record()));
        engine.kick();
        Ok(())
    }

    /// Waits for queued pushes. Returns `None` when sync is not configured.
    pub async fn flush_sync(&self) -> Option<SyncStats> {
        match &self.sync {
            Some(engine) => Some(engine.flush().await),
            None => None,
        }
    }

    // --- Session ---

    /// Runs a controller operation and forwards its events to sync.
    /// # Errors
    /// Returns the operation's `SessionError` wrapped in `anyhow::Error`.
    pub fn with_session<T>(
        &mut self,
        op: impl FnOnce(&mut SessionController) -> Result<T, SessionError>,
    ) -> Result<(T, Vec<SessionEvent>)> {
        let result = op(&mut self.controller);
        // Events from a partially applied op still describe durable local writes
        let events = self.controller.take_events();
        if let Some(engine) = &self.sync {
            engine.handle_events(&events, self.controller.store());
        }
        Ok((result?, events))
    }

    pub fn session_view(&self) -> Option<SessionView> {
        self.controller.view()
    }

    // --- Defaults and first-time setup ---

    /// Saves defaults for `exercise` in the active plan. `None` fields keep the
    /// previously saved value.
    /// # Errors
    /// Returns an error if no plan is loaded or the write fails.
    pub fn save_exercise_defaults(&self, exercise: &str, values: ExerciseDefaults) -> Result<()> {
        let plan_id = &self.catalog().plan_id;
        if plan_id.is_empty() {
            bail!("No training plan loaded; import or pull one first.");
        }
        let mut all = self.store().load_defaults();
        let saved = all
            .entry(plan_id.clone())
            .or_default()
            .entry(exercise.to_string())
            .or_default();
        if let Some(w) = values.weight.filter(|w| *w > 0.0) {
            saved.weight = Some(w);
        }
        if let Some(r) = values.repeats.filter(|r| *r > 0) {
            saved.repeats = Some(r);
        }
        if let Some(r) = values.rest_time.filter(|r| *r > 0) {
            saved.rest_time = Some(r);
        }
        self.store()
            .save_defaults(&all)
            .context("Failed to save exercise defaults")?;
        Ok(())
    }

    pub fn first_time_completed(&self) -> bool {
        self.store().first_time_completed()
    }

    /// Stores the initial defaults from the first-time setup flow and marks it done.
    /// # Errors
    /// Returns an error if any write fails.
    pub fn complete_first_time_setup(
        &self,
        initial: &BTreeMap<String, ExerciseDefaults>,
    ) -> Result<()> {
        for (exercise, values) in initial {
            self.save_exercise_defaults(exercise, *values)?;
        }
        self.store()
            .set_first_time_completed(true)
            .context("Failed to mark first-time setup as done")?;
        info!("First-time setup stored defaults for {} exercises", initial.len());
        if self.sync.is_some() {
            self.queue_full_resync()?;
        }
        Ok(())
    }

    // --- Customisation ---

    /// # Errors
    /// Returns `DbError` if the write fails.
    pub fn set_custom_exercise(
        &self,
        exercise: &str,
        title: Option<String>,
        note: Option<String>,
    ) -> Result<(), DbError> {
        let mut custom = self.store().load_custom_exercises();
        let entry = custom.entry(exercise.to_string()).or_default();
        if title.is_some() {
            entry.title = title.filter(|t| !t.trim().is_empty());
        }
        if note.is_some() {
            entry.note = note.filter(|n| !n.trim().is_empty());
        }
        if entry.title.is_none() && entry.note.is_none() {
            custom.remove(exercise);
        }
        self.store().save_custom_exercises(&custom)
    }

    pub fn volume(&self) -> u8 {
        self.store().load_volume()
    }

    /// # Errors
    /// Returns `DbError` if the write fails.
    pub fn set_volume(&self, volume: u8) -> Result<(), DbError> {
        self.store().save_volume(volume)
    }

    // --- History ---

    pub fn history(&self, exercise: &str) -> Vec<HistoryEntry> {
        self.store().load_history().entries(exercise).to_vec()
    }

    /// # Errors
    /// Returns an error if writing the CSV fails.
    pub fn export_history_csv<W: Write>(&self, out: W) -> Result<()> {
        self.store().load_history().export_csv(out)
    }
}

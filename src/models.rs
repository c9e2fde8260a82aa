//src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prescription for one exercise inside a training.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSpec {
    pub name: String,
    pub number_of_sets: u32,
    #[serde(default)]
    pub min_rest: u32, // seconds
    #[serde(default)]
    pub max_rest: u32, // seconds
    #[serde(default)]
    pub min_reps: u32,
    #[serde(default)]
    pub max_reps: u32,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub muscle_group: Option<String>,
    #[serde(default)]
    pub video_link: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Training {
    pub name: String,
    pub exercises: Vec<ExerciseSpec>, // Order here is the session order
}

impl Training {
    pub fn exercise(&self, name: &str) -> Option<&ExerciseSpec> {
        self.exercises.iter().find(|e| e.name == name)
    }
}

/// A training plan as assigned to the trainee.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrainingCatalog {
    pub plan_id: String,
    #[serde(default)]
    pub trainings: Vec<Training>,
}

impl TrainingCatalog {
    pub fn training(&self, name: &str) -> Option<&Training> {
        self.trainings
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn training_names(&self) -> Vec<&str> {
        self.trainings.iter().map(|t| t.name.as_str()).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct SetResult {
    pub weight: Option<f64>,
    pub repeats: Option<u32>,
}

impl SetResult {
    /// Builds a set result, storing zero or negative values as absent.
    pub fn new(weight: Option<f64>, repeats: Option<u32>) -> Self {
        Self {
            weight: weight.filter(|w| *w > 0.0),
            repeats: repeats.filter(|r| *r > 0),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    pub weight: Option<f64>,
    pub repeats: Option<u32>,
    pub rest_time: Option<u32>,
    pub completed_sets: u32,
    pub total_sets: u32,
    #[serde(default)]
    pub sets_data: Vec<SetResult>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgress {
    pub date: String, // Day key, see progress::day_key
    pub training_type: String,
    #[serde(default)]
    pub exercise_progress: BTreeMap<String, u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseDefaults {
    pub weight: Option<f64>,
    pub rest_time: Option<u32>,
    pub repeats: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CustomExerciseOverride {
    pub title: Option<String>,
    pub note: Option<String>,
}

/// plan id -> exercise name -> defaults
pub type PlanDefaults = BTreeMap<String, BTreeMap<String, ExerciseDefaults>>;

/// The comprehensive record the server holds for a trainee.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraineeRecord {
    #[serde(default)]
    pub defaults: PlanDefaults,
    #[serde(default)]
    pub progress: BTreeMap<String, DailyProgress>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<HistoryEntry>>,
    #[serde(default)]
    pub first_time_completed: bool,
}

/// A single completed exercise, pushed right after completion.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSessionRecord {
    pub plan_id: String,
    pub training: String,
    pub exercise: String,
    pub entry: HistoryEntry,
}

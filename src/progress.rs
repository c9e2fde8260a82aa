//src/progress.rs
use crate::models::DailyProgress;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// Which calendar decides when daily progress expires.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DayBoundary {
    #[default]
    Local, // Local midnight
    Utc,
}

impl DayBoundary {
    pub fn date_of(self, at: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Local => at.with_timezone(&Local).date_naive(),
            Self::Utc => at.date_naive(),
        }
    }

    pub fn day_key(self, at: DateTime<Utc>) -> String {
        self.date_of(at).format("%Y-%m-%d").to_string()
    }
}

/// Completed sets per exercise for the current training day, keyed by training.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct ProgressLog {
    trainings: BTreeMap<String, DailyProgress>,
}

impl ProgressLog {
    pub fn from_map(trainings: BTreeMap<String, DailyProgress>) -> Self {
        Self { trainings }
    }

    pub fn into_map(self) -> BTreeMap<String, DailyProgress> {
        self.trainings
    }

    /// Stale days read as absent; they stay stored until overwritten.
    pub fn today<'a>(&'a self, training: &str, day_key: &str) -> Option<&'a DailyProgress> {
        self.trainings
            .get(training)
            .filter(|p| p.date == day_key)
    }

    pub fn completed_sets(&self, training: &str, exercise: &str, day_key: &str) -> Option<u32> {
        self.today(training, day_key)
            .and_then(|p| p.exercise_progress.get(exercise).copied())
    }

    pub fn record_sets(&mut self, training: &str, exercise: &str, completed_sets: u32, day_key: &str) {
        let progress = self
            .trainings
            .entry(training.to_string())
            .or_insert_with(|| DailyProgress {
                date: day_key.to_string(),
                training_type: training.to_string(),
                exercise_progress: BTreeMap::new(),
            });
        if progress.date != day_key {
            // New day: start over
            progress.date = day_key.to_string();
            progress.exercise_progress.clear();
        }
        progress
            .exercise_progress
            .insert(exercise.to_string(), completed_sets);
    }

    pub fn clear_training(&mut self, training: &str) {
        self.trainings.remove(training);
    }
}

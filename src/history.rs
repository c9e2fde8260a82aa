//src/history.rs
use crate::models::{HistoryEntry, SetResult};
use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

pub const MAX_ENTRIES_PER_EXERCISE: usize = 50;
/// Entries closer than this collapse into one.
pub const DEDUP_WINDOW_MS: i64 = 1000;

/// Completed exercise instances keyed by exercise name, newest first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct ExerciseHistory {
    entries: BTreeMap<String, Vec<HistoryEntry>>,
}

impl ExerciseHistory {
    pub fn from_map(entries: BTreeMap<String, Vec<HistoryEntry>>) -> Self {
        Self { entries }
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<HistoryEntry>> {
        self.entries
    }

    pub fn entries(&self, exercise: &str) -> &[HistoryEntry] {
        self.entries.get(exercise).map_or(&[], Vec::as_slice)
    }

    pub fn latest(&self, exercise: &str) -> Option<&HistoryEntry> {
        self.entries(exercise).first()
    }

    pub fn exercise_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Records a completion. A resubmission within the dedup window overwrites the
    /// existing entry instead of adding a second one.
    pub fn record_completion(&mut self, exercise: &str, entry: HistoryEntry) {
        let list = self.entries.entry(exercise.to_string()).or_default();
        let new_ms = entry.date.timestamp_millis();
        if let Some(existing) = list
            .iter_mut()
            .find(|e| (e.date.timestamp_millis() - new_ms).abs() <= DEDUP_WINDOW_MS)
        {
            *existing = entry;
            return;
        }
        list.insert(0, entry);
        list.truncate(MAX_ENTRIES_PER_EXERCISE);
    }

    /// Replaces the sets of the entry dated `today` (in `tz`). Returns false when no
    /// such entry exists.
    pub fn update_todays_entry<Tz: TimeZone>(
        &mut self,
        exercise: &str,
        sets_data: &[SetResult],
        today: NaiveDate,
        tz: &Tz,
    ) -> bool {
        let Some(list) = self.entries.get_mut(exercise) else {
            return false;
        };
        let Some(entry) = list
            .iter_mut()
            .find(|e| e.date.with_timezone(tz).date_naive() == today)
        else {
            return false;
        };
        entry.sets_data = sets_data.to_vec();
        // Display fields mirror the first set
        let first = sets_data.first().copied().unwrap_or_default();
        entry.weight = first.weight;
        entry.repeats = first.repeats;
        true
    }

    /// Writes every entry as CSV, one row per set.
    /// # Errors
    /// Returns an error if writing to `out` fails.
    pub fn export_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer
            .write_record([
                "exercise", "date", "set", "weight", "repeats", "rest_time", "completed_sets",
                "total_sets",
            ])
            .context("Failed to write CSV header")?;
        for (exercise, list) in &self.entries {
            for entry in list {
                for (i, set) in entry.sets_data.iter().enumerate() {
                    writer
                        .write_record([
                            exercise.clone(),
                            entry.date.to_rfc3339(),
                            (i + 1).to_string(),
                            set.weight.map(|w| w.to_string()).unwrap_or_default(),
                            set.repeats.map(|r| r.to_string()).unwrap_or_default(),
                            entry.rest_time.map(|r| r.to_string()).unwrap_or_default(),
                            entry.completed_sets.to_string(),
                            entry.total_sets.to_string(),
                        ])
                        .with_context(|| format!("Failed to write CSV row for {exercise}"))?;
                }
            }
        }
        writer.flush().context("Failed to flush CSV output")?;
        Ok(())
    }
}

//src/defaults.rs
//! Pre-fill values for a set, resolved through a fixed priority cascade:
//! saved per-plan default, first set of the latest history entry, any last-used
//! historical value, then a fallback computed from the exercise prescription.
//! Zero or negative values never count as "set" at any layer.
use crate::models::{ExerciseDefaults, ExerciseSpec, HistoryEntry, PlanDefaults};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResolvedValues {
    pub weight: Option<f64>,
    pub repeats: Option<u32>,
    pub rest_time: Option<u32>,
}

fn positive_weight(w: Option<f64>) -> Option<f64> {
    w.filter(|w| *w > 0.0)
}

fn positive_count(n: Option<u32>) -> Option<u32> {
    n.filter(|n| *n > 0)
}

/// Looks up the saved defaults for an exercise within a single plan.
pub fn saved_defaults<'a>(
    defaults: &'a PlanDefaults,
    plan_id: &str,
    exercise: &str,
) -> Option<&'a ExerciseDefaults> {
    defaults.get(plan_id).and_then(|by_ex| by_ex.get(exercise))
}

/// `history` is expected newest-first, as kept by the history store.
pub fn resolve_weight(saved: Option<&ExerciseDefaults>, history: &[HistoryEntry]) -> Option<f64> {
    positive_weight(saved.and_then(|d| d.weight))
        .or_else(|| {
            history
                .first()
                .and_then(|latest| latest.sets_data.first())
                .and_then(|set| positive_weight(set.weight))
        })
        .or_else(|| history.iter().find_map(|e| positive_weight(e.weight)))
}

pub fn resolve_repeats(
    spec: &ExerciseSpec,
    saved: Option<&ExerciseDefaults>,
    history: &[HistoryEntry],
) -> Option<u32> {
    positive_count(saved.and_then(|d| d.repeats))
        .or_else(|| {
            history
                .first()
                .and_then(|latest| latest.sets_data.first())
                .and_then(|set| positive_count(set.repeats))
        })
        .or_else(|| history.iter().find_map(|e| positive_count(e.repeats)))
        .or_else(|| positive_count(Some(spec.min_reps)))
}

pub fn resolve_rest_time(spec: &ExerciseSpec, saved: Option<&ExerciseDefaults>) -> Option<u32> {
    positive_count(saved.and_then(|d| d.rest_time)).or_else(|| positive_count(Some(spec.max_rest)))
}

pub fn resolve(
    spec: &ExerciseSpec,
    saved: Option<&ExerciseDefaults>,
    history: &[HistoryEntry],
) -> ResolvedValues {
    ResolvedValues {
        weight: resolve_weight(saved, history),
        repeats: resolve_repeats(spec, saved, history),
        rest_time: resolve_rest_time(spec, saved),
    }
}

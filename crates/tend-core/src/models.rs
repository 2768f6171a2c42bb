use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::recurrence::{Frequency, RuleSpec};

/// A recurring event series: the single source of truth for a repeating
/// calendar entry. `starts_at`/`ends_at` mirror the rule's first and last
/// occurrence and must stay consistent with `rrule` after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventSeries {
    /// Primary key, UUIDv7 for time-ordered performance
    #[serde(with = "uuid::serde::compact")]
    pub id: Uuid,
    /// Owning care circle (tenancy scope)
    #[serde(with = "uuid::serde::compact")]
    pub circle_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// Canonical recurrence string, understood only by [`RuleSpec`]
    pub rrule: String,
    /// First occurrence produced by the rule
    pub starts_at: DateTime<Utc>,
    /// Last occurrence produced by the rule; None = unbounded
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Moves and/or renames exactly one occurrence without touching the series
/// definition. `original_at` anchors the exception to an instant the rule
/// produces; `moved_to` is where the occurrence actually surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SeriesException {
    #[serde(with = "uuid::serde::compact")]
    pub id: Uuid,
    #[serde(with = "uuid::serde::compact")]
    pub series_id: Uuid,
    pub original_at: DateTime<Utc>,
    pub moved_to: DateTime<Utc>,
    /// None = inherit from the series
    pub title: Option<String>,
    /// None = inherit from the series
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Removes exactly one occurrence. Mutually exclusive with an exception at
/// the same `(series_id, original_at)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SeriesCancellation {
    #[serde(with = "uuid::serde::compact")]
    pub id: Uuid,
    #[serde(with = "uuid::serde::compact")]
    pub series_id: Uuid,
    pub original_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-circle watermark: occurrences up to `cloned_until` have been
/// materialized into care tasks. Monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CloneFrontier {
    #[serde(with = "uuid::serde::compact")]
    pub circle_id: Uuid,
    pub cloned_until: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A materialized task copied from a resolved occurrence. Independent of
/// its source series once created: later series edits never reach back
/// into existing rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CareTask {
    #[serde(with = "uuid::serde::compact")]
    pub id: Uuid,
    #[serde(with = "uuid::serde::compact")]
    pub batch_id: Uuid,
    #[serde(with = "uuid::serde::compact")]
    pub circle_id: Uuid,
    /// Source series, kept for traceability only
    pub series_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub occurs_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Exception row joined to its owning series, carrying the series content
/// needed for title/description inheritance during resolution.
#[derive(Debug, Clone, FromRow)]
pub struct ExceptionWithSeries {
    pub id: Uuid,
    pub series_id: Uuid,
    pub original_at: DateTime<Utc>,
    pub moved_to: DateTime<Utc>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub series_title: String,
    pub series_description: Option<String>,
    pub series_rrule: String,
}

/// One concrete calendar entry produced by resolving a window: either a raw
/// rule occurrence or an exception override, with inherited content already
/// applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub series_id: Uuid,
    /// Set when this entry comes from an exception override
    pub exception_id: Option<Uuid>,
    pub occurs_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub rrule: String,
}

/// How far an edit or cancellation propagates across a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    /// Affect only the selected occurrence
    ThisOccurrence,
    /// Rewrite the series from the selected occurrence onward
    ThisAndFuture,
    /// Modify the entire series including past occurrences
    EntireSeries,
}

impl std::fmt::Display for EditScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditScope::ThisOccurrence => write!(f, "occurrence"),
            EditScope::ThisAndFuture => write!(f, "future"),
            EditScope::EntireSeries => write!(f, "series"),
        }
    }
}

impl FromStr for EditScope {
    type Err = ParseEditScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "occurrence" | "this" | "single" => Ok(EditScope::ThisOccurrence),
            "future" | "this_and_future" => Ok(EditScope::ThisAndFuture),
            "series" | "entire" | "all" => Ok(EditScope::EntireSeries),
            _ => Err(ParseEditScopeError(s.to_string())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid edit scope: {0}")]
pub struct ParseEditScopeError(String);

/// Identifies the occurrence an edit or cancellation is aimed at: an
/// existing exception by id, or a `(series, instant)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceRef {
    Exception(Uuid),
    Series {
        series_id: Uuid,
        occurs_at: DateTime<Utc>,
    },
}

/// Partial change set for scoped edits. Outer `None` = leave the field
/// alone; for doubly-optional fields the inner `None` clears the value
/// (description back to inherited, end back to unbounded, count removed).
#[derive(Debug, Clone, Default)]
pub struct SeriesChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<Option<DateTime<Utc>>>,
    pub freq: Option<Frequency>,
    pub interval: Option<u16>,
    pub count: Option<Option<u32>>,
    pub weekdays: Option<Vec<Weekday>>,
}

impl SeriesChanges {
    /// True when any field that feeds the recurrence rule is present.
    /// Timing changes invalidate exception anchors and force rule rebuilds.
    pub fn timing_changed(&self) -> bool {
        self.starts_at.is_some()
            || self.ends_at.is_some()
            || self.freq.is_some()
            || self.interval.is_some()
            || self.count.is_some()
            || self.weekdays.is_some()
    }
}

/// Data required to create a new event series.
#[derive(Debug, Clone)]
pub struct NewSeriesData {
    pub circle_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub rule: RuleSpec,
}

//! Window resolution: merges rule expansion with exception and cancellation
//! records into the materialized occurrence list.
//!
//! This module is pure: callers load the rows, [`resolve_window`] merges
//! them. The persistence half lives in `repository::resolver`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{EventSeries, ExceptionWithSeries, Occurrence, SeriesCancellation};
use crate::recurrence::RuleSpec;

/// Merges the three record kinds into the ordered occurrence list for the
/// closed window `[start, end]`.
///
/// Per-series rules:
/// - every raw rule occurrence inside the window becomes a candidate;
/// - a cancellation at the candidate's instant drops it;
/// - an exception anchored at the candidate's instant drops it; the
///   exception's own candidate (at `moved_to`) supersedes;
/// - exception candidates landing outside the window are dropped (they are
///   loaded whenever either endpoint of the move falls inside it);
/// - the result is sorted ascending by instant, ties in input order.
pub fn resolve_window(
    series: &[EventSeries],
    exceptions: &[ExceptionWithSeries],
    cancellations: &[SeriesCancellation],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Occurrence>, CoreError> {
    let cancelled: HashSet<(Uuid, DateTime<Utc>)> = cancellations
        .iter()
        .map(|c| (c.series_id, c.original_at))
        .collect();
    let overridden: HashSet<(Uuid, DateTime<Utc>)> = exceptions
        .iter()
        .map(|e| (e.series_id, e.original_at))
        .collect();

    let mut occurrences = Vec::new();

    for entry in series {
        let spec = RuleSpec::parse_stored(&entry.rrule)?;
        for at in spec.occurrences_between(start, end)? {
            if cancelled.contains(&(entry.id, at)) || overridden.contains(&(entry.id, at)) {
                continue;
            }
            occurrences.push(Occurrence {
                series_id: entry.id,
                exception_id: None,
                occurs_at: at,
                title: entry.title.clone(),
                description: entry.description.clone(),
                rrule: entry.rrule.clone(),
            });
        }
    }

    for exception in exceptions {
        if exception.moved_to < start || exception.moved_to > end {
            continue;
        }
        occurrences.push(Occurrence {
            series_id: exception.series_id,
            exception_id: Some(exception.id),
            occurs_at: exception.moved_to,
            title: exception
                .title
                .clone()
                .unwrap_or_else(|| exception.series_title.clone()),
            description: exception
                .description
                .clone()
                .or_else(|| exception.series_description.clone()),
            rrule: exception.series_rrule.clone(),
        });
    }

    // Stable sort keeps ties in input order.
    occurrences.sort_by_key(|o| o.occurs_at);
    Ok(occurrences)
}

use crate::error::CoreError;
use crate::models::{EditScope, EventSeries, OccurrenceRef, SeriesChanges, SeriesException};
use crate::recurrence::RuleSpec;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tracing::debug;
use uuid::Uuid;

/// A mutation target resolved against the store: the owning series, the
/// exception it names (if any), and the rule instant anchoring the scope
/// decision (an exception's `original_at`, else the given instant).
struct ResolvedTarget {
    series: EventSeries,
    exception: Option<SeriesException>,
    selected_at: DateTime<Utc>,
}

#[async_trait]
impl super::MutationRepository for SqliteRepository {
    async fn edit_occurrence(
        &self,
        circle_id: Uuid,
        target: OccurrenceRef,
        scope: EditScope,
        changes: SeriesChanges,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        let resolved = Self::resolve_target_in_transaction(&mut tx, circle_id, target).await?;
        match scope {
            EditScope::ThisOccurrence => {
                Self::edit_single_occurrence(&mut tx, resolved, changes).await?
            }
            EditScope::ThisAndFuture => Self::edit_from_future(&mut tx, resolved, changes).await?,
            EditScope::EntireSeries => Self::edit_entire_series(&mut tx, resolved, changes).await?,
        }
        tx.commit().await?;
        Ok(())
    }

    async fn cancel_occurrence(
        &self,
        circle_id: Uuid,
        target: OccurrenceRef,
        scope: EditScope,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        let resolved = Self::resolve_target_in_transaction(&mut tx, circle_id, target).await?;
        match scope {
            EditScope::ThisOccurrence => Self::cancel_single_occurrence(&mut tx, resolved).await?,
            EditScope::ThisAndFuture => Self::cancel_from_future(&mut tx, resolved).await?,
            EditScope::EntireSeries => {
                Self::delete_series_in_transaction(&mut tx, resolved.series.id).await?
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

impl SqliteRepository {
    async fn resolve_target_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        circle_id: Uuid,
        target: OccurrenceRef,
    ) -> Result<ResolvedTarget, CoreError> {
        match target {
            OccurrenceRef::Exception(id) => {
                let exception: SeriesException =
                    sqlx::query_as("SELECT * FROM series_exceptions WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| {
                            CoreError::NotFound(format!("Exception with id {id} not found"))
                        })?;

                let series = Self::find_circle_series_in_transaction(
                    tx,
                    circle_id,
                    exception.series_id,
                )
                .await?;

                Ok(ResolvedTarget {
                    selected_at: exception.original_at,
                    series,
                    exception: Some(exception),
                })
            }
            OccurrenceRef::Series {
                series_id,
                occurs_at,
            } => {
                let series =
                    Self::find_circle_series_in_transaction(tx, circle_id, series_id).await?;

                // An instant naming an existing exception resolves to that
                // exception: by surfaced time first, then by anchor. This
                // is how a previously moved occurrence stays addressable.
                let exception: Option<SeriesException> = sqlx::query_as(
                    r#"SELECT * FROM series_exceptions
                    WHERE series_id = $1 AND (moved_to = $2 OR original_at = $2)
                    ORDER BY CASE WHEN moved_to = $2 THEN 0 ELSE 1 END
                    LIMIT 1"#,
                )
                .bind(series_id)
                .bind(occurs_at)
                .fetch_optional(&mut **tx)
                .await?;

                let selected_at = exception
                    .as_ref()
                    .map(|e| e.original_at)
                    .unwrap_or(occurs_at);

                Ok(ResolvedTarget {
                    series,
                    exception,
                    selected_at,
                })
            }
        }
    }

    async fn find_circle_series_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        circle_id: Uuid,
        series_id: Uuid,
    ) -> Result<EventSeries, CoreError> {
        sqlx::query_as("SELECT * FROM event_series WHERE id = $1 AND circle_id = $2")
            .bind(series_id)
            .bind(circle_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Series with id {series_id} not found")))
    }

    /// Edit exactly one occurrence: update the existing exception in place,
    /// or anchor a new one at the selected rule instant.
    async fn edit_single_occurrence(
        tx: &mut Transaction<'_, Sqlite>,
        resolved: ResolvedTarget,
        changes: SeriesChanges,
    ) -> Result<(), CoreError> {
        if let Some(exception) = resolved.exception {
            let title = match changes.title {
                Some(title) => Some(title),
                None => exception.title,
            };
            let description = match changes.description {
                Some(description) => description,
                None => exception.description,
            };
            let moved_to = changes.starts_at.unwrap_or(exception.moved_to);

            sqlx::query(
                "UPDATE series_exceptions SET title = $1, description = $2, moved_to = $3 WHERE id = $4",
            )
            .bind(title)
            .bind(description)
            .bind(moved_to)
            .bind(exception.id)
            .execute(&mut **tx)
            .await?;
            return Ok(());
        }

        let series = resolved.series;
        let at = resolved.selected_at;
        let spec = RuleSpec::parse_stored(&series.rrule)?;
        if !spec.occurs_on(at)? {
            return Err(CoreError::NotFound(format!(
                "Series {} has no occurrence at {at}",
                series.id
            )));
        }
        Self::ensure_not_cancelled(tx, series.id, at).await?;

        Self::insert_exception_in_transaction(
            tx,
            series.id,
            at,
            changes.starts_at.unwrap_or(at),
            changes.title,
            changes.description.flatten(),
        )
        .await?;
        Ok(())
    }

    /// Edit from the selected occurrence onward. With no prior occurrence
    /// the series is rewritten in place; otherwise it is split: the
    /// original is truncated at the pivot and a successor series carries
    /// the tail.
    async fn edit_from_future(
        tx: &mut Transaction<'_, Sqlite>,
        resolved: ResolvedTarget,
        changes: SeriesChanges,
    ) -> Result<(), CoreError> {
        let series = resolved.series;
        let selected = resolved.selected_at;
        let spec = RuleSpec::parse_stored(&series.rrule)?;
        let timing_changed = changes.timing_changed();

        if timing_changed {
            // The rewritten tail supersedes any exception anchored in it.
            sqlx::query("DELETE FROM series_exceptions WHERE series_id = $1 AND original_at >= $2")
                .bind(series.id)
                .bind(selected)
                .execute(&mut **tx)
                .await?;
        }

        let pivot = spec.last_before(selected)?;
        debug!(series_id = %series.id, %selected, ?pivot, timing_changed, "editing series tail");

        let Some(pivot_at) = pivot else {
            // Nothing precedes the selection: no split required.
            let rebuilt = spec.apply(&changes);
            Self::update_series_rule_in_transaction(tx, series.id, &rebuilt).await?;
            Self::update_series_content_in_transaction(tx, series.id, &changes).await?;
            return Ok(());
        };

        // A COUNT-based rule hands the unconsumed remainder to the tail.
        let remaining_count = match spec.count {
            Some(total) => {
                let consumed = spec.occurrences_between(spec.dtstart, pivot_at)?.len() as u32;
                Some(total.saturating_sub(consumed))
            }
            None => None,
        };

        let truncated = spec.truncated_at(pivot_at);
        Self::update_series_rule_in_transaction(tx, series.id, &truncated).await?;

        let mut successor_rule = spec.apply(&changes);
        successor_rule.dtstart = changes.starts_at.unwrap_or(selected);
        if changes.count.is_none() && successor_rule.until.is_none() {
            if let Some(remaining) = remaining_count {
                successor_rule.count = Some(remaining.max(1));
            }
        }

        let successor = Self::insert_series_in_transaction(
            tx,
            series.circle_id,
            changes.title.clone().unwrap_or_else(|| series.title.clone()),
            match &changes.description {
                Some(description) => description.clone(),
                None => series.description.clone(),
            },
            &successor_rule,
        )
        .await?;

        if !timing_changed {
            // Same timing, so future anchors still line up: re-parent the
            // surviving exceptions to the successor instead of losing them.
            sqlx::query(
                "UPDATE series_exceptions SET series_id = $1 WHERE series_id = $2 AND original_at >= $3",
            )
            .bind(successor.id)
            .bind(series.id)
            .bind(selected)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// Edit every occurrence. Timing changes rebuild the rule wholesale and
    /// demote exceptions to pure date overrides.
    async fn edit_entire_series(
        tx: &mut Transaction<'_, Sqlite>,
        resolved: ResolvedTarget,
        changes: SeriesChanges,
    ) -> Result<(), CoreError> {
        let series = resolved.series;

        if changes.timing_changed() {
            let spec = RuleSpec::parse_stored(&series.rrule)?;
            let rebuilt = spec.apply(&changes);
            let (new_start, new_end) = Self::window_of(&rebuilt)?;
            Self::update_series_rule_in_transaction(tx, series.id, &rebuilt).await?;

            if changes.starts_at.is_some() || changes.ends_at.is_some() {
                // Exceptions anchored outside the new bounds are gone.
                sqlx::query(
                    r#"DELETE FROM series_exceptions
                    WHERE series_id = $1
                      AND (original_at < $2 OR ($3 IS NOT NULL AND original_at > $4))"#,
                )
                .bind(series.id)
                .bind(new_start)
                .bind(new_end)
                .bind(new_end)
                .execute(&mut **tx)
                .await?;
            }

            // Survivors keep their dates but re-inherit content.
            sqlx::query(
                "UPDATE series_exceptions SET title = NULL, description = NULL WHERE series_id = $1",
            )
            .bind(series.id)
            .execute(&mut **tx)
            .await?;
        }

        Self::update_series_content_in_transaction(tx, series.id, &changes).await?;
        Ok(())
    }

    /// Cancel exactly one occurrence, converting an existing exception into
    /// a cancellation at its original anchor.
    async fn cancel_single_occurrence(
        tx: &mut Transaction<'_, Sqlite>,
        resolved: ResolvedTarget,
    ) -> Result<(), CoreError> {
        let series = resolved.series;
        let at = resolved.selected_at;

        if let Some(exception) = &resolved.exception {
            sqlx::query("DELETE FROM series_exceptions WHERE id = $1")
                .bind(exception.id)
                .execute(&mut **tx)
                .await?;
        } else {
            let spec = RuleSpec::parse_stored(&series.rrule)?;
            if !spec.occurs_on(at)? {
                return Err(CoreError::NotFound(format!(
                    "Series {} has no occurrence at {at}",
                    series.id
                )));
            }
        }

        Self::ensure_not_cancelled(tx, series.id, at).await?;

        sqlx::query(
            r#"INSERT INTO series_cancellations (id, series_id, original_at, created_at)
            VALUES ($1, $2, $3, $4)"#,
        )
        .bind(Uuid::now_v7())
        .bind(series.id)
        .bind(at)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Cancel from the selected occurrence onward: truncate the series at
    /// the pivot, or delete it entirely when cancelling from the start.
    async fn cancel_from_future(
        tx: &mut Transaction<'_, Sqlite>,
        resolved: ResolvedTarget,
    ) -> Result<(), CoreError> {
        let series = resolved.series;
        let cut = resolved.selected_at;
        let spec = RuleSpec::parse_stored(&series.rrule)?;

        if let Some(exception) = &resolved.exception {
            // Sweep everything this series surfaces at or after the cut.
            sqlx::query("DELETE FROM series_exceptions WHERE series_id = $1 AND moved_to >= $2")
                .bind(series.id)
                .bind(exception.original_at)
                .execute(&mut **tx)
                .await?;
        }

        let pivot = spec.last_before(cut)?;
        debug!(series_id = %series.id, %cut, ?pivot, "cancelling series tail");

        let Some(pivot_at) = pivot else {
            // The whole series is being cancelled from its start.
            return Self::delete_series_in_transaction(tx, series.id).await;
        };

        let truncated = spec.truncated_at(pivot_at);
        Self::update_series_rule_in_transaction(tx, series.id, &truncated).await?;

        // Anchors past the new end are no longer producible by the rule.
        sqlx::query("DELETE FROM series_exceptions WHERE series_id = $1 AND original_at > $2")
            .bind(series.id)
            .bind(pivot_at)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM series_cancellations WHERE series_id = $1 AND original_at > $2")
            .bind(series.id)
            .bind(pivot_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn ensure_not_cancelled(
        tx: &mut Transaction<'_, Sqlite>,
        series_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let cancelled: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM series_cancellations WHERE series_id = $1 AND original_at = $2",
        )
        .bind(series_id)
        .bind(at)
        .fetch_optional(&mut **tx)
        .await?;

        if cancelled.is_some() {
            return Err(CoreError::Conflict(format!(
                "Occurrence of series {series_id} at {at} is already cancelled"
            )));
        }
        Ok(())
    }

    pub(crate) async fn insert_exception_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        series_id: Uuid,
        original_at: DateTime<Utc>,
        moved_to: DateTime<Utc>,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<SeriesException, CoreError> {
        let exception = SeriesException {
            id: Uuid::now_v7(),
            series_id,
            original_at,
            moved_to,
            title,
            description,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"INSERT INTO series_exceptions (id, series_id, original_at, moved_to, title, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(exception.id)
        .bind(exception.series_id)
        .bind(exception.original_at)
        .bind(exception.moved_to)
        .bind(&exception.title)
        .bind(&exception.description)
        .bind(exception.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => CoreError::Conflict(
                format!("Series {series_id} already has an exception at {original_at}"),
            ),
            other => CoreError::Database(other),
        })?;

        Ok(exception)
    }

    async fn update_series_content_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        series_id: Uuid,
        changes: &SeriesChanges,
    ) -> Result<(), CoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE event_series SET ");
        let mut updated = false;

        if let Some(title) = &changes.title {
            qb.push("title = ");
            qb.push_bind(title);
            updated = true;
        }

        if let Some(description) = &changes.description {
            if updated {
                qb.push(", ");
            }
            qb.push("description = ");
            qb.push_bind(description.clone());
            updated = true;
        }

        if updated {
            qb.push(", updated_at = ");
            qb.push_bind(Utc::now());
            qb.push(" WHERE id = ");
            qb.push_bind(series_id);
            qb.build().execute(&mut **tx).await?;
        }
        Ok(())
    }
}

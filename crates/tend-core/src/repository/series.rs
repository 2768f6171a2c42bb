use crate::error::CoreError;
use crate::models::{EventSeries, NewSeriesData, SeriesCancellation, SeriesException};
use crate::recurrence::RuleSpec;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

#[async_trait]
impl super::SeriesRepository for SqliteRepository {
    async fn create_series(&self, data: NewSeriesData) -> Result<EventSeries, CoreError> {
        let mut tx = self.pool().begin().await?;
        let series = Self::insert_series_in_transaction(
            &mut tx,
            data.circle_id,
            data.title,
            data.description,
            &data.rule,
        )
        .await?;
        tx.commit().await?;
        Ok(series)
    }

    async fn find_series_by_id(&self, id: Uuid) -> Result<Option<EventSeries>, CoreError> {
        let series = sqlx::query_as("SELECT * FROM event_series WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(series)
    }

    async fn find_series_in_circle(&self, circle_id: Uuid) -> Result<Vec<EventSeries>, CoreError> {
        let series =
            sqlx::query_as("SELECT * FROM event_series WHERE circle_id = $1 ORDER BY starts_at")
                .bind(circle_id)
                .fetch_all(self.pool())
                .await?;
        Ok(series)
    }

    async fn delete_series(&self, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        Self::delete_series_in_transaction(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_exception_by_id(&self, id: Uuid) -> Result<Option<SeriesException>, CoreError> {
        let exception = sqlx::query_as("SELECT * FROM series_exceptions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(exception)
    }

    async fn find_series_exceptions(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<SeriesException>, CoreError> {
        let exceptions = sqlx::query_as(
            "SELECT * FROM series_exceptions WHERE series_id = $1 ORDER BY original_at",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(exceptions)
    }

    async fn find_series_cancellations(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<SeriesCancellation>, CoreError> {
        let cancellations = sqlx::query_as(
            "SELECT * FROM series_cancellations WHERE series_id = $1 ORDER BY original_at",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(cancellations)
    }
}

impl SqliteRepository {
    /// Derives the `(starts_at, ends_at)` window a rule implies, enforcing
    /// the window invariant before anything is written.
    pub(crate) fn window_of(
        rule: &RuleSpec,
    ) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>), CoreError> {
        let starts_at = rule.first_occurrence()?.ok_or_else(|| {
            CoreError::InvalidRule("rule produces no occurrences".to_string())
        })?;
        let ends_at = rule.last_occurrence()?;
        if let Some(ends_at) = ends_at {
            if ends_at < starts_at {
                return Err(CoreError::InvariantViolation(format!(
                    "window end {ends_at} precedes window start {starts_at}"
                )));
            }
        }
        Ok((starts_at, ends_at))
    }

    /// Insert a series within an existing transaction. The window columns
    /// are always derived from the rule, never trusted from the caller.
    pub(crate) async fn insert_series_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        circle_id: Uuid,
        title: String,
        description: Option<String>,
        rule: &RuleSpec,
    ) -> Result<EventSeries, CoreError> {
        rule.validate()?;
        let (starts_at, ends_at) = Self::window_of(rule)?;

        let series = EventSeries {
            id: Uuid::now_v7(),
            circle_id,
            title,
            description,
            rrule: rule.to_rule_string(),
            starts_at,
            ends_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        sqlx::query(
            r#"INSERT INTO event_series (id, circle_id, title, description, rrule, starts_at, ends_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(series.id)
        .bind(series.circle_id)
        .bind(&series.title)
        .bind(&series.description)
        .bind(&series.rrule)
        .bind(series.starts_at)
        .bind(series.ends_at)
        .bind(series.created_at)
        .bind(series.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(series)
    }

    /// Rewrites a series' rule and window columns together, keeping them
    /// mutually consistent.
    pub(crate) async fn update_series_rule_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        series_id: Uuid,
        rule: &RuleSpec,
    ) -> Result<(), CoreError> {
        let (starts_at, ends_at) = Self::window_of(rule)?;
        let result = sqlx::query(
            "UPDATE event_series SET rrule = $1, starts_at = $2, ends_at = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(rule.to_rule_string())
        .bind(starts_at)
        .bind(ends_at)
        .bind(Utc::now())
        .bind(series_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "Series with id {series_id} not found"
            )));
        }
        Ok(())
    }

    /// Delete a series and its exception/cancellation rows within an
    /// existing transaction. Materialized care tasks are left alone: their
    /// lifecycle is independent once created.
    pub(crate) async fn delete_series_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM series_exceptions WHERE series_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM series_cancellations WHERE series_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        let result = sqlx::query("DELETE FROM event_series WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Series with id {id} not found")));
        }
        Ok(())
    }
}

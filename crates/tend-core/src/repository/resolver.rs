use crate::error::CoreError;
use crate::models::{EventSeries, ExceptionWithSeries, Occurrence, SeriesCancellation};
use crate::repository::SqliteRepository;
use crate::resolver::resolve_window;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

#[async_trait]
impl super::CalendarRepository for SqliteRepository {
    async fn resolve(
        &self,
        circle_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, CoreError> {
        let mut tx = self.pool().begin().await?;
        let occurrences = Self::resolve_in_transaction(&mut tx, circle_id, start, end).await?;
        tx.commit().await?;
        Ok(occurrences)
    }
}

impl SqliteRepository {
    /// Loads the three record kinds for the window and hands them to the
    /// pure merge. Also backs the frontier cloner, which resolves inside
    /// its own write transaction.
    pub(crate) async fn resolve_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        circle_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, CoreError> {
        if end < start {
            return Err(CoreError::InvalidInput(
                "window end precedes window start".to_string(),
            ));
        }

        let series: Vec<EventSeries> = sqlx::query_as(
            r#"SELECT * FROM event_series
            WHERE circle_id = $1 AND starts_at <= $2 AND (ends_at IS NULL OR ends_at >= $3)
            ORDER BY starts_at, id"#,
        )
        .bind(circle_id)
        .bind(end)
        .bind(start)
        .fetch_all(&mut **tx)
        .await?;

        // An exception is relevant when either endpoint of its move falls
        // inside the window: the anchor suppresses a raw candidate, the
        // target may surface a new one.
        let exceptions: Vec<ExceptionWithSeries> = sqlx::query_as(
            r#"SELECT e.id, e.series_id, e.original_at, e.moved_to, e.title, e.description,
                s.title AS series_title, s.description AS series_description, s.rrule AS series_rrule
            FROM series_exceptions e
            JOIN event_series s ON s.id = e.series_id
            WHERE s.circle_id = $1
              AND (e.original_at BETWEEN $2 AND $3 OR e.moved_to BETWEEN $2 AND $3)
            ORDER BY e.moved_to, e.id"#,
        )
        .bind(circle_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut **tx)
        .await?;

        let cancellations: Vec<SeriesCancellation> = sqlx::query_as(
            r#"SELECT c.* FROM series_cancellations c
            JOIN event_series s ON s.id = c.series_id
            WHERE s.circle_id = $1 AND c.original_at BETWEEN $2 AND $3"#,
        )
        .bind(circle_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut **tx)
        .await?;

        resolve_window(&series, &exceptions, &cancellations, start, end)
    }
}

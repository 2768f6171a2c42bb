use crate::error::CoreError;
use crate::models::{CareTask, CloneFrontier};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

#[async_trait]
impl super::FrontierRepository for SqliteRepository {
    async fn clone_to_frontier(
        &self,
        circle_id: Uuid,
        batch_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        let frontier: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT cloned_until FROM clone_frontiers WHERE circle_id = $1")
                .bind(circle_id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(cloned_until) = frontier {
            if cloned_until >= end {
                return Err(CoreError::Conflict(format!(
                    "Window ending {end} is already behind the clone frontier {cloned_until}"
                )));
            }
        }

        let occurrences = Self::resolve_in_transaction(&mut tx, circle_id, start, end).await?;

        // Idempotency guard: one task per source occurrence, regardless of
        // how the caller overlaps clone windows.
        let existing = Self::cloned_occurrences_in_transaction(&mut tx, circle_id, start, end).await?;

        let mut created = 0usize;
        for occurrence in occurrences {
            if existing.contains(&(occurrence.series_id, occurrence.occurs_at)) {
                continue;
            }

            let task = CareTask {
                id: Uuid::now_v7(),
                batch_id,
                circle_id,
                series_id: Some(occurrence.series_id),
                title: occurrence.title,
                description: occurrence.description,
                occurs_at: occurrence.occurs_at,
                completed_at: None,
                completed_by: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };

            sqlx::query(
                r#"INSERT INTO care_tasks (id, batch_id, circle_id, series_id, title, description, occurs_at, completed_at, completed_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
            )
            .bind(task.id)
            .bind(task.batch_id)
            .bind(task.circle_id)
            .bind(task.series_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.occurs_at)
            .bind(task.completed_at)
            .bind(task.completed_by)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await?;

            created += 1;
        }

        // The watermark never moves backwards.
        sqlx::query(
            r#"INSERT INTO clone_frontiers (circle_id, cloned_until, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (circle_id) DO UPDATE SET
                cloned_until = MAX(cloned_until, excluded.cloned_until),
                updated_at = excluded.updated_at"#,
        )
        .bind(circle_id)
        .bind(end)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(%circle_id, %batch_id, created, "cloned occurrences to frontier {end}");
        Ok(())
    }

    async fn find_frontier(&self, circle_id: Uuid) -> Result<Option<CloneFrontier>, CoreError> {
        let frontier = sqlx::query_as("SELECT * FROM clone_frontiers WHERE circle_id = $1")
            .bind(circle_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(frontier)
    }

    async fn find_tasks_in_window(
        &self,
        circle_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CareTask>, CoreError> {
        let tasks = sqlx::query_as(
            r#"SELECT * FROM care_tasks
            WHERE circle_id = $1 AND occurs_at BETWEEN $2 AND $3
            ORDER BY occurs_at"#,
        )
        .bind(circle_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }
}

impl SqliteRepository {
    async fn cloned_occurrences_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        circle_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<(Uuid, DateTime<Utc>)>, CoreError> {
        let rows: Vec<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"SELECT series_id, occurs_at FROM care_tasks
            WHERE circle_id = $1 AND series_id IS NOT NULL AND occurs_at BETWEEN $2 AND $3"#,
        )
        .bind(circle_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().collect())
    }
}

use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    CareTask, CloneFrontier, EditScope, EventSeries, NewSeriesData, Occurrence, OccurrenceRef,
    SeriesCancellation, SeriesChanges, SeriesException,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

// Re-export domain modules
pub mod frontier;
pub mod mutation;
pub mod resolver;
pub mod series;

// Traits are defined in this module and implemented in respective domain
// modules. Every mutating operation runs as one transaction; the store must
// provide read-committed isolation and serialize writers per series (SQLite's
// single-writer transactions satisfy both).

/// Persistence for the three linked record kinds: series (the recurrence
/// definition), exceptions and cancellations.
#[async_trait]
pub trait SeriesRepository {
    async fn create_series(&self, data: NewSeriesData) -> Result<EventSeries, CoreError>;
    async fn find_series_by_id(&self, id: Uuid) -> Result<Option<EventSeries>, CoreError>;
    async fn find_series_in_circle(&self, circle_id: Uuid) -> Result<Vec<EventSeries>, CoreError>;
    async fn delete_series(&self, id: Uuid) -> Result<(), CoreError>;
    async fn find_exception_by_id(&self, id: Uuid) -> Result<Option<SeriesException>, CoreError>;
    async fn find_series_exceptions(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<SeriesException>, CoreError>;
    async fn find_series_cancellations(
        &self,
        series_id: Uuid,
    ) -> Result<Vec<SeriesCancellation>, CoreError>;
}

/// Read-only window resolution.
#[async_trait]
pub trait CalendarRepository {
    /// Materializes the ordered occurrence list for the closed window
    /// `[start, end]` within one circle.
    async fn resolve(
        &self,
        circle_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, CoreError>;
}

/// Scoped edits and cancellations against a series. Each call is atomic:
/// either every write lands or none do.
#[async_trait]
pub trait MutationRepository {
    async fn edit_occurrence(
        &self,
        circle_id: Uuid,
        target: OccurrenceRef,
        scope: EditScope,
        changes: SeriesChanges,
    ) -> Result<(), CoreError>;

    async fn cancel_occurrence(
        &self,
        circle_id: Uuid,
        target: OccurrenceRef,
        scope: EditScope,
    ) -> Result<(), CoreError>;
}

/// Frontier-gated materialization of occurrences into care tasks.
#[async_trait]
pub trait FrontierRepository {
    /// Clones every resolved occurrence in `[start, end]` into a care task
    /// under `batch_id`, then advances the circle's frontier to `end`.
    /// Idempotent per `(series_id, occurs_at)`.
    async fn clone_to_frontier(
        &self,
        circle_id: Uuid,
        batch_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    async fn find_frontier(&self, circle_id: Uuid) -> Result<Option<CloneFrontier>, CoreError>;

    async fn find_tasks_in_window(
        &self,
        circle_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CareTask>, CoreError>;
}

/// Main repository trait that composes all domain traits
#[async_trait]
pub trait Repository:
    SeriesRepository + CalendarRepository + MutationRepository + FrontierRepository
{
}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool for internal use across modules
    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Repository for SqliteRepository {}

//! # Tend Core Library
//!
//! The recurring-event engine behind the tend caregiving calendar: a
//! single recurrence definition per series, point-in-time exception and
//! cancellation records layered on top, and well-defined semantics for
//! editing or cancelling "this occurrence", "this and all future
//! occurrences" or the entire series without corrupting the definition.
//!
//! ## Features
//!
//! - **Series-Based Recurrence**: RFC 5545-class rules wrapped in a typed
//!   [`recurrence::RuleSpec`] value object; rule strings never leave the
//!   adapter
//! - **Window Resolution**: deterministic merge of rule expansion,
//!   exception overrides and cancellations into an ordered occurrence list
//! - **Scoped Mutation**: occurrence/future/series edits and cancels,
//!   including series splitting, each as one atomic transaction
//! - **Frontier Cloning**: occurrences materialize into independently
//!   mutable care tasks at most once, behind a persisted watermark
//! - **Type Safety**: typed value objects for scopes, targets and partial
//!   change sets; sqlx-checked persistence
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`models`]: Core data structures and transfer objects
//! - [`repository`]: Data access layer with Repository pattern
//! - [`recurrence`]: Recurrence rule adapter over the rrule crate
//! - [`resolver`]: Pure occurrence-merge logic
//! - [`error`]: Error types with context
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chrono::{TimeZone, Utc};
//! use tend_core::{
//!     db,
//!     models::NewSeriesData,
//!     recurrence::{Frequency, RuleSpec},
//!     repository::{CalendarRepository, SeriesRepository, SqliteRepository},
//! };
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = db::establish_connection("tend.db").await?;
//!     let repo = SqliteRepository::new(pool);
//!
//!     let circle_id = Uuid::now_v7();
//!     let series = repo
//!         .create_series(NewSeriesData {
//!             circle_id,
//!             title: "Morning medication".to_string(),
//!             description: None,
//!             rule: RuleSpec {
//!                 dtstart: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
//!                 freq: Frequency::Daily,
//!                 interval: 1,
//!                 until: None,
//!                 count: None,
//!                 weekdays: vec![],
//!             },
//!         })
//!         .await?;
//!
//!     let occurrences = repo
//!         .resolve(
//!             circle_id,
//!             Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!             Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
//!         )
//!         .await?;
//!     println!("{} occurrences of {}", occurrences.len(), series.title);
//!
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod recurrence;
pub mod repository;
pub mod resolver;

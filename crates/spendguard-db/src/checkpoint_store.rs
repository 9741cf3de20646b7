//! Workflow checkpoint persistence.
//!
//! Each save rewrites the full snapshot (last writer wins per workflow id).
//! Steps and metadata are stored as JSON text, timestamps as unix
//! milliseconds, and the cost total as a decimal string so no precision
//! is lost in `SQLite`'s REAL affinity.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use spendguard_types::WorkflowId;
use spendguard_workflow::{WorkflowCheckpoint, WorkflowStatus, WorkflowStep};

use crate::error::DbError;

/// Listing filter for [`CheckpointStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    /// Only workflows owned by this id.
    pub owner_id: Option<String>,
    /// Only workflows in one of these statuses. Empty means any.
    pub statuses: Vec<WorkflowStatus>,
    /// Maximum rows returned.
    pub limit: Option<u32>,
}

impl WorkflowFilter {
    /// Filter for one owner.
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    /// Restrict to the given statuses.
    #[must_use]
    pub fn with_statuses(mut self, statuses: &[WorkflowStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    /// Cap the number of rows.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Operations on the `workflows` table.
pub struct CheckpointStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CheckpointStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if steps or metadata cannot be
    /// encoded and [`DbError::Sqlite`] if the write fails.
    pub async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), DbError> {
        let steps = serde_json::to_string(&checkpoint.steps)?;
        let metadata = checkpoint
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r"INSERT INTO workflows
              (id, owner_id, name, steps, current_step_index, status, created_at, updated_at,
               total_input_tokens, total_output_tokens, total_cost, metadata)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
              ON CONFLICT (id) DO UPDATE SET
                owner_id = excluded.owner_id,
                name = excluded.name,
                steps = excluded.steps,
                current_step_index = excluded.current_step_index,
                status = excluded.status,
                updated_at = excluded.updated_at,
                total_input_tokens = excluded.total_input_tokens,
                total_output_tokens = excluded.total_output_tokens,
                total_cost = excluded.total_cost,
                metadata = excluded.metadata",
        )
        .bind(checkpoint.id.to_string())
        .bind(&checkpoint.owner_id)
        .bind(&checkpoint.name)
        .bind(steps)
        .bind(i64::try_from(checkpoint.current_step_index).unwrap_or(i64::MAX))
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.created_at.timestamp_millis())
        .bind(checkpoint.updated_at.timestamp_millis())
        .bind(i64::try_from(checkpoint.total_input_tokens).unwrap_or(i64::MAX))
        .bind(i64::try_from(checkpoint.total_output_tokens).unwrap_or(i64::MAX))
        .bind(checkpoint.total_cost.to_string())
        .bind(metadata)
        .execute(self.pool)
        .await?;

        tracing::debug!(
            workflow_id = %checkpoint.id,
            status = %checkpoint.status,
            step = checkpoint.current_step_index,
            "Saved workflow checkpoint"
        );
        Ok(())
    }

    /// Load one checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the stored row cannot be decoded or
    /// violates a checkpoint invariant.
    pub async fn get(&self, id: WorkflowId) -> Result<Option<WorkflowCheckpoint>, DbError> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r"SELECT id, owner_id, name, steps, current_step_index, status, created_at, updated_at,
                     total_input_tokens, total_output_tokens, total_cost, metadata
              FROM workflows
              WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool)
        .await?;

        row.map(WorkflowRow::into_checkpoint).transpose()
    }

    /// Checkpoints matching `filter`, most recently updated first.
    ///
    /// Undecodable rows are logged and skipped so one bad checkpoint does
    /// not hide the rest.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the query fails.
    pub async fn list(&self, filter: &WorkflowFilter) -> Result<Vec<WorkflowCheckpoint>, DbError> {
        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r"SELECT id, owner_id, name, steps, current_step_index, status, created_at, updated_at,
                     total_input_tokens, total_output_tokens, total_cost, metadata
              FROM workflows WHERE 1 = 1",
        );
        if let Some(owner) = &filter.owner_id {
            query.push(" AND owner_id = ").push_bind(owner.clone());
        }
        if !filter.statuses.is_empty() {
            query.push(" AND status IN (");
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY updated_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = query
            .build_query_as::<WorkflowRow>()
            .fetch_all(self.pool)
            .await?;
        let checkpoints = rows
            .into_iter()
            .filter_map(|row| match row.into_checkpoint() {
                Ok(checkpoint) => Some(checkpoint),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable workflow checkpoint");
                    None
                }
            })
            .collect();
        Ok(checkpoints)
    }

    /// Workflows that can be picked up again: running, and optionally
    /// paused ones too.
    ///
    /// # Errors
    ///
    /// See [`CheckpointStore::list`].
    pub async fn list_resumable(
        &self,
        owner_id: Option<&str>,
        include_paused: bool,
        limit: Option<u32>,
    ) -> Result<Vec<WorkflowCheckpoint>, DbError> {
        let statuses: &[WorkflowStatus] = if include_paused {
            &[WorkflowStatus::Running, WorkflowStatus::Paused]
        } else {
            &[WorkflowStatus::Running]
        };
        let filter = WorkflowFilter {
            owner_id: owner_id.map(str::to_owned),
            statuses: statuses.to_vec(),
            limit,
        };
        self.list(&filter).await
    }

    /// Delete one checkpoint. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the delete fails.
    pub async fn delete(&self, id: WorkflowId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id.to_string())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every checkpoint last updated before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the delete fails.
    pub async fn delete_old(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM workflows WHERE updated_at < $1")
            .bind(cutoff.timestamp_millis())
            .execute(self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, %cutoff, "Pruned old workflow checkpoints");
        }
        Ok(removed)
    }

    /// Number of stored checkpoints.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the query fails.
    pub async fn count(&self) -> Result<u64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflows")
            .fetch_one(self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// A row from the `workflows` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowRow {
    /// Workflow id (UUID text).
    pub id: String,
    /// Owner id.
    pub owner_id: String,
    /// Workflow name.
    pub name: String,
    /// Steps as a JSON array.
    pub steps: String,
    /// Index of the next step.
    pub current_step_index: i64,
    /// Lowercase status.
    pub status: String,
    /// Creation time, unix millis.
    pub created_at: i64,
    /// Last update, unix millis.
    pub updated_at: i64,
    /// Input token total.
    pub total_input_tokens: i64,
    /// Output token total.
    pub total_output_tokens: i64,
    /// Cost total as a decimal string.
    pub total_cost: String,
    /// Metadata as JSON text.
    pub metadata: Option<String>,
}

impl WorkflowRow {
    /// Decode into a checkpoint, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] naming the row and the bad column.
    pub fn into_checkpoint(self) -> Result<WorkflowCheckpoint, DbError> {
        let Self {
            id: raw_id,
            owner_id,
            name,
            steps,
            current_step_index,
            status,
            created_at,
            updated_at,
            total_input_tokens,
            total_output_tokens,
            total_cost,
            metadata,
        } = self;
        let corrupt = |reason: String| DbError::Corrupt {
            id: raw_id.clone(),
            reason,
        };

        let id = WorkflowId::from_str(&raw_id).map_err(|e| corrupt(format!("id: {e}")))?;
        let steps: Vec<WorkflowStep> =
            serde_json::from_str(&steps).map_err(|e| corrupt(format!("steps: {e}")))?;
        let status =
            WorkflowStatus::from_str(&status).map_err(|e| corrupt(format!("status: {e}")))?;
        let current_step_index = usize::try_from(current_step_index)
            .map_err(|e| corrupt(format!("current_step_index: {e}")))?;
        let created_at = from_millis(created_at)
            .ok_or_else(|| corrupt(String::from("created_at out of range")))?;
        let updated_at = from_millis(updated_at)
            .ok_or_else(|| corrupt(String::from("updated_at out of range")))?;
        let total_cost =
            Decimal::from_str(&total_cost).map_err(|e| corrupt(format!("total_cost: {e}")))?;
        let metadata = metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("metadata: {e}")))?;

        let checkpoint = WorkflowCheckpoint {
            id,
            owner_id,
            name,
            steps,
            current_step_index,
            status,
            created_at,
            updated_at,
            total_input_tokens: u64::try_from(total_input_tokens).unwrap_or(0),
            total_output_tokens: u64::try_from(total_output_tokens).unwrap_or(0),
            total_cost,
            metadata,
        };
        checkpoint.validate().map_err(|e| corrupt(e.to_string()))?;
        Ok(checkpoint)
    }
}

/// Unix milliseconds to a UTC timestamp.
pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

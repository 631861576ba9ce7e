//! Persistent cursors: durable resume points that outlive any single
//! changefeed job.
//!
//! The ledger is one table per cluster, `persistent_cursors(key STRING
//! PRIMARY KEY, resume_offset INT, last_used_job_id INT)`, created lazily
//! on first use. Two invariants are enforced at claim time, under a row
//! lock:
//! - a cursor owned by a job that has not reached a terminal status
//!   cannot be reassigned;
//! - at most one cursor may reference a given job id.

use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::Lifecycle;
use async_trait::async_trait;
use scuttle_session::{JobStatus, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

const CURSOR_TABLE: &str = "persistent_cursors";
const ID_KIND: &str = "cursor";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentCursorConfig {
    pub cluster_id: String,
    pub key: String,
    /// Seconds added to the stored high-water mark on resumption, useful
    /// for skipping past whatever made the previous job fail.
    pub resume_offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentCursorState {
    pub id: String,
    pub cluster_id: String,
    pub key: String,
    pub resume_offset: i64,
    pub last_used_job_id: Option<i64>,
    /// Offset-adjusted high-water mark, as a decimal timestamp string.
    pub high_water_mark: Option<String>,
}

/// Everything the ledger knows about one cursor.
#[derive(Debug, Clone)]
pub struct CursorValue {
    pub high_water: Option<String>,
    /// High-water plus the resume offset; what a new changefeed should
    /// pass as its `cursor` option.
    pub offset_high_water: Option<String>,
    pub resume_offset: i64,
    pub last_job_id: Option<i64>,
    /// Status of the owning job, when one exists and is still known to
    /// the cluster.
    pub owner_status: Option<String>,
}

impl CursorValue {
    /// A cursor is in use while its last job is in a non-terminal state.
    pub fn in_use(&self) -> bool {
        if self.last_job_id.is_none() {
            return false;
        }
        match self.owner_status.as_deref() {
            Some(status) => match JobStatus::from_str(status) {
                Ok(status) => !status.is_terminal(),
                // A status this version does not know is assumed live.
                Err(_) => true,
            },
            // Job already pruned from the jobs table.
            None => false,
        }
    }
}

pub fn cursor_id(cluster_id: &str, key: &str) -> String {
    id::compose(ID_KIND, &[cluster_id, key])
}

/// Split a cursor resource id into (cluster, key).
pub fn parse_cursor_id(id: &str) -> ResourceResult<(String, String)> {
    let mut parts = id::split(ID_KIND, id, 2)?.into_iter();
    match (parts.next(), parts.next()) {
        (Some(cluster), Some(key)) => Ok((cluster, key)),
        _ => Err(ResourceError::InvalidId {
            id: id.to_string(),
            reason: "missing cluster or key segment".to_string(),
        }),
    }
}

/// Create the ledger table if this cluster does not have one yet.
async fn ensure_table(session: &SessionManager, cluster_id: &str) -> ResourceResult<()> {
    session
        .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
            let count: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM information_schema.tables WHERE table_name = $1",
            )
            .bind(CURSOR_TABLE)
            .fetch_one(&pool)
            .await?;
            if count == 1 {
                return Ok(());
            }
            let create = format!(
                "CREATE TABLE {CURSOR_TABLE} (key STRING PRIMARY KEY, resume_offset INT, last_used_job_id INT)"
            );
            sqlx::query(&create).execute(&pool).await?;
            Ok::<_, ResourceError>(())
        })
        .await
}

/// Read a cursor's current value, joined against the owning job's status.
/// Returns `None` when no cursor row exists for the key.
pub async fn read_value(
    session: &SessionManager,
    cluster_id: &str,
    key: &str,
) -> ResourceResult<Option<CursorValue>> {
    let key = key.to_string();
    session
        .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
            let query = format!(
                "SELECT jobs.high_water_timestamp::STRING AS high_water, \
                        ct.resume_offset, \
                        ((jobs.high_water_timestamp::DECIMAL) + (ct.resume_offset::DECIMAL * 1000000))::STRING AS offset_high_water, \
                        ct.last_used_job_id, \
                        jobs.status \
                 FROM {CURSOR_TABLE} ct \
                 LEFT OUTER JOIN [SHOW CHANGEFEED JOBS] AS jobs ON jobs.job_id = ct.last_used_job_id \
                 WHERE ct.key = $1"
            );
            let row = sqlx::query(&query).bind(&key).fetch_optional(&pool).await?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok::<_, ResourceError>(Some(CursorValue {
                high_water: row.try_get("high_water")?,
                resume_offset: row.try_get::<Option<i64>, _>("resume_offset")?.unwrap_or(0),
                offset_high_water: row.try_get("offset_high_water")?,
                last_job_id: row.try_get("last_used_job_id")?,
                owner_status: row.try_get("status")?,
            }))
        })
        .await
}

/// Point a cursor at a job (or clear it with `None`).
///
/// Runs as a transaction: the cursor row is locked, the current owner's
/// status is checked, and the one-cursor-per-job invariant is verified
/// before the owner column changes. Conflicts surface as descriptive
/// errors; nothing is written on failure.
pub async fn assign_job(
    session: &SessionManager,
    cluster_id: &str,
    key: &str,
    job_id: Option<i64>,
) -> ResourceResult<()> {
    let key = key.to_string();
    session
        .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
            let mut tx = pool.begin().await?;

            let select = format!(
                "SELECT key, last_used_job_id, \
                        (SELECT status FROM [SHOW CHANGEFEED JOBS] WHERE job_id = last_used_job_id) AS status \
                 FROM {CURSOR_TABLE} WHERE key = $1 FOR UPDATE"
            );
            let row = sqlx::query(&select)
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                return Err(ResourceError::NotFound(format!("cursor {key:?}")));
            };

            let current_job: Option<i64> = row.try_get("last_used_job_id")?;
            let status: Option<String> = row.try_get("status")?;
            if let Some(current_job) = current_job {
                let live = match status.as_deref() {
                    Some(status) => !JobStatus::from_str(status)
                        .map(|status| status.is_terminal())
                        .unwrap_or(false),
                    None => false,
                };
                if live {
                    return Err(ResourceError::Conflict(format!(
                        "cursor is still in use by job {current_job}"
                    )));
                }
            }

            if let Some(job_id) = job_id {
                let others = format!(
                    "SELECT count(*) FROM {CURSOR_TABLE} WHERE last_used_job_id = $1 AND key != $2"
                );
                let other_count: i64 = sqlx::query_scalar(&others)
                    .bind(job_id)
                    .bind(&key)
                    .fetch_one(&mut *tx)
                    .await?;
                if other_count > 0 {
                    return Err(ResourceError::Conflict(format!(
                        "job {job_id} is already referenced by another cursor"
                    )));
                }
            }

            let update =
                format!("UPDATE {CURSOR_TABLE} SET last_used_job_id = $1 WHERE key = $2");
            sqlx::query(&update)
                .bind(job_id)
                .bind(&key)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, ResourceError>(())
        })
        .await
}

/// The persistent cursor as a declarative resource.
pub struct PersistentCursorResource {
    session: Arc<SessionManager>,
}

impl PersistentCursorResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Lifecycle for PersistentCursorResource {
    type Config = PersistentCursorConfig;
    type State = PersistentCursorState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        ensure_table(&self.session, &config.cluster_id).await?;

        let key = config.key.clone();
        let resume_offset = config.resume_offset;
        self.session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let insert = format!(
                    "INSERT INTO {CURSOR_TABLE} (key, resume_offset) VALUES ($1, $2)"
                );
                sqlx::query(&insert)
                    .bind(&key)
                    .bind(resume_offset)
                    .execute(&pool)
                    .await?;
                Ok::<_, ResourceError>(())
            })
            .await?;

        Ok(PersistentCursorState {
            id: cursor_id(&config.cluster_id, &config.key),
            cluster_id: config.cluster_id,
            key: config.key,
            resume_offset: config.resume_offset,
            last_used_job_id: None,
            high_water_mark: None,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let value = match read_value(&self.session, &state.cluster_id, &state.key).await {
            Ok(value) => value,
            Err(err) if err.is_cluster_unavailable() => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(value) = value else {
            return Ok(None);
        };
        Ok(Some(PersistentCursorState {
            id: state.id.clone(),
            cluster_id: state.cluster_id.clone(),
            key: state.key.clone(),
            resume_offset: value.resume_offset,
            last_used_job_id: value.last_job_id,
            high_water_mark: value.offset_high_water,
        }))
    }

    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State> {
        let key = state.key.clone();
        let resume_offset = plan.resume_offset;
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let update = format!(
                    "UPDATE {CURSOR_TABLE} SET resume_offset = $1 WHERE key = $2"
                );
                sqlx::query(&update)
                    .bind(resume_offset)
                    .bind(&key)
                    .execute(&pool)
                    .await?;
                Ok::<_, ResourceError>(())
            })
            .await?;

        Ok(PersistentCursorState {
            resume_offset: plan.resume_offset,
            ..state
        })
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        tracing::debug!(
            cluster = %state.cluster_id,
            key = %state.key,
            "deleting persistent cursor"
        );
        let key = state.key.clone();
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let delete = format!("DELETE FROM {CURSOR_TABLE} WHERE key = $1");
                sqlx::query(&delete).bind(&key).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_ids_round_trip() {
        let id = cursor_id("cluster-a", "orders-feed");
        assert_eq!(id, "cursor|cluster-a|orders-feed");
        let (cluster, key) = parse_cursor_id(&id).unwrap();
        assert_eq!(cluster, "cluster-a");
        assert_eq!(key, "orders-feed");
    }

    #[test]
    fn malformed_cursor_ids_error_instead_of_panicking() {
        assert!(parse_cursor_id("cursor|only-cluster").is_err());
        assert!(parse_cursor_id("user|c|k").is_err());
        assert!(parse_cursor_id("").is_err());
    }

    fn value(last_job_id: Option<i64>, owner_status: Option<&str>) -> CursorValue {
        CursorValue {
            high_water: None,
            offset_high_water: None,
            resume_offset: 0,
            last_job_id,
            owner_status: owner_status.map(str::to_string),
        }
    }

    #[test]
    fn cursor_in_use_only_while_owner_is_live() {
        assert!(value(Some(7), Some("running")).in_use());
        assert!(value(Some(7), Some("paused")).in_use());
        assert!(!value(Some(7), Some("canceled")).in_use());
        assert!(!value(Some(7), Some("canceling")).in_use());
        assert!(!value(Some(7), Some("failed")).in_use());
        assert!(!value(Some(7), Some("succeeded")).in_use());
        // Owner pruned from the jobs table: reclaimable.
        assert!(!value(Some(7), None).in_use());
        // Never owned.
        assert!(!value(None, None).in_use());
    }
}

//! Schema migrations, delegated to `sqlx::migrate`.
//!
//! This resource does not interpret migration files itself: it points the
//! migration library at a local directory and runs it over the scoped
//! pool for the target database. The applied version in state is whatever
//! the library's ledger table reports afterwards.

use crate::error::{ResourceError, ResourceResult};
use crate::Lifecycle;
use async_trait::async_trait;
use scuttle_session::SessionManager;
use serde::{Deserialize, Serialize};
use sqlx::migrate::Migrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What destroying the resource does to the applied migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyMode {
    /// Leave the schema as-is.
    Noop,
    /// Revert every reversible migration.
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub cluster_id: String,
    pub database: String,
    pub migrations_dir: PathBuf,
    pub destroy_mode: DestroyMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    pub id: String,
    pub cluster_id: String,
    pub database: String,
    pub migrations_dir: PathBuf,
    pub destroy_mode: DestroyMode,
    /// Latest applied version, 0 when nothing has been applied.
    pub version: i64,
}

pub fn migration_id(cluster_id: &str, database: &str) -> String {
    format!("{cluster_id}|{database}|migrations")
}

pub struct MigrationResource {
    session: Arc<SessionManager>,
}

impl MigrationResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    async fn load_migrator(dir: &Path) -> ResourceResult<Migrator> {
        Ok(Migrator::new(dir).await?)
    }

    async fn run_migrations(&self, config: &MigrationConfig) -> ResourceResult<i64> {
        let dir = config.migrations_dir.clone();
        self.session
            .with_conn(&config.cluster_id, &config.database, |pool| async move {
                let migrator = Self::load_migrator(&dir).await?;
                migrator.run(&pool).await?;
                applied_version(&pool).await
            })
            .await
    }
}

/// Latest successfully applied version from the migration ledger.
async fn applied_version(pool: &sqlx::PgPool) -> ResourceResult<i64> {
    let version: Option<i64> = sqlx::query_scalar(
        "SELECT version FROM _sqlx_migrations WHERE success = true \
         ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(version.unwrap_or(0))
}

#[async_trait]
impl Lifecycle for MigrationResource {
    type Config = MigrationConfig;
    type State = MigrationState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        let version = self.run_migrations(&config).await?;
        Ok(MigrationState {
            id: migration_id(&config.cluster_id, &config.database),
            cluster_id: config.cluster_id,
            database: config.database,
            migrations_dir: config.migrations_dir,
            destroy_mode: config.destroy_mode,
            version,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let version = self
            .session
            .with_conn(&state.cluster_id, &state.database, |pool| async move {
                applied_version(&pool).await
            })
            .await;
        match version {
            Ok(version) => Ok(Some(MigrationState {
                version,
                ..state.clone()
            })),
            Err(err) if err.is_cluster_unavailable() => Ok(None),
            // The ledger table does not exist until something has run.
            Err(ResourceError::Session(scuttle_session::SessionError::Database(db_err)))
                if db_err
                    .as_database_error()
                    .map(|e| e.message().contains("does not exist"))
                    .unwrap_or(false) =>
            {
                Ok(Some(MigrationState {
                    version: 0,
                    ..state.clone()
                }))
            }
            Err(err) => Err(err),
        }
    }

    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State> {
        let version = self.run_migrations(&plan).await?;
        Ok(MigrationState {
            migrations_dir: plan.migrations_dir,
            destroy_mode: plan.destroy_mode,
            version,
            ..state
        })
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        if state.destroy_mode == DestroyMode::Noop {
            return Ok(());
        }
        let dir = state.migrations_dir.clone();
        self.session
            .with_conn(&state.cluster_id, &state.database, |pool| async move {
                let migrator = Self::load_migrator(&dir).await?;
                // Revert everything; target 0 means no version survives.
                migrator.undo(&pool, 0).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_ids_name_the_database() {
        assert_eq!(
            migration_id("cluster-1", "appdb"),
            "cluster-1|appdb|migrations"
        );
    }

    #[test]
    fn destroy_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DestroyMode::Noop).unwrap(), "\"noop\"");
        assert_eq!(serde_json::to_string(&DestroyMode::Down).unwrap(), "\"down\"");
    }
}

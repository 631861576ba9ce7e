//! SQL roles. Roles have no mutable attributes here, so update is
//! rejected rather than silently accepted.

use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::privileges;
use crate::{Import, Lifecycle};
use async_trait::async_trait;
use scuttle_session::{quote, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ID_KIND: &str = "role";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRoleConfig {
    pub cluster_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRoleState {
    pub id: String,
    pub cluster_id: String,
    pub name: String,
}

pub fn sql_role_id(cluster_id: &str, name: &str) -> String {
    id::compose(ID_KIND, &[cluster_id, name])
}

fn parse_sql_role_id(id: &str) -> ResourceResult<(String, String)> {
    let mut parts = id::split(ID_KIND, id, 2)?.into_iter();
    match (parts.next(), parts.next()) {
        (Some(cluster), Some(name)) => Ok((cluster, name)),
        _ => Err(ResourceError::InvalidId {
            id: id.to_string(),
            reason: "missing cluster or role segment".to_string(),
        }),
    }
}

pub struct SqlRoleResource {
    session: Arc<SessionManager>,
}

impl SqlRoleResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    async fn exists(&self, cluster_id: &str, name: &str) -> ResourceResult<bool> {
        let name = name.to_string();
        self.session
            .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM [SHOW USERS] WHERE username = $1)",
                )
                .bind(&name)
                .fetch_one(&pool)
                .await?;
                Ok::<_, ResourceError>(exists)
            })
            .await
    }
}

#[async_trait]
impl Lifecycle for SqlRoleResource {
    type Config = SqlRoleConfig;
    type State = SqlRoleState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        let statement = format!("CREATE ROLE {}", quote::ident(&config.name));
        self.session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await?;

        Ok(SqlRoleState {
            id: sql_role_id(&config.cluster_id, &config.name),
            cluster_id: config.cluster_id,
            name: config.name,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        match self.exists(&state.cluster_id, &state.name).await {
            Ok(true) => Ok(Some(state.clone())),
            Ok(false) => Ok(None),
            Err(err) if err.is_cluster_unavailable() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn update(&self, _plan: Self::Config, _state: Self::State) -> ResourceResult<Self::State> {
        Err(ResourceError::Validation(
            "sql roles cannot be updated in place".to_string(),
        ))
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        let name = state.name.clone();
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                privileges::revoke_all(&pool, &name).await?;
                let statement = format!("DROP ROLE {}", quote::ident(&name));
                sqlx::query(&statement).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[async_trait]
impl Import for SqlRoleResource {
    async fn import(&self, id: &str) -> ResourceResult<Self::State> {
        let (cluster_id, name) = parse_sql_role_id(id)?;
        let exists = match self.exists(&cluster_id, &name).await {
            Ok(exists) => exists,
            Err(err) if err.is_cluster_unavailable() => false,
            Err(err) => return Err(err),
        };
        if !exists {
            return Err(ResourceError::NotFound(format!("role {name:?}")));
        }
        Ok(SqlRoleState {
            id: id.to_string(),
            cluster_id,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ids_round_trip() {
        let id = sql_role_id("cluster-1", "readers");
        assert_eq!(id, "role|cluster-1|readers");
        let (cluster, name) = parse_sql_role_id(&id).unwrap();
        assert_eq!((cluster.as_str(), name.as_str()), ("cluster-1", "readers"));
        assert!(parse_sql_role_id("user|cluster-1|readers").is_err());
    }
}

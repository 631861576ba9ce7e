//! SQL users: templated DDL with an existence-based read.

use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::privileges;
use crate::{Import, Lifecycle};
use async_trait::async_trait;
use scuttle_session::{quote, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ID_KIND: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlUserConfig {
    pub cluster_id: String,
    pub name: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlUserState {
    pub id: String,
    pub cluster_id: String,
    pub name: String,
    pub password: Option<String>,
}

pub fn sql_user_id(cluster_id: &str, name: &str) -> String {
    id::compose(ID_KIND, &[cluster_id, name])
}

fn parse_sql_user_id(id: &str) -> ResourceResult<(String, String)> {
    let mut parts = id::split(ID_KIND, id, 2)?.into_iter();
    match (parts.next(), parts.next()) {
        (Some(cluster), Some(name)) => Ok((cluster, name)),
        _ => Err(ResourceError::InvalidId {
            id: id.to_string(),
            reason: "missing cluster or username segment".to_string(),
        }),
    }
}

pub struct SqlUserResource {
    session: Arc<SessionManager>,
}

impl SqlUserResource {
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
impl Lifecycle for SqlUserResource {
    type Config = SqlUserConfig;
    type State = SqlUserState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        let name = config.name.clone();
        let password = config.password.clone();
        self.session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                match password {
                    Some(password) => {
                        let statement =
                            format!("CREATE USER {} WITH PASSWORD $1", quote::ident(&name));
                        sqlx::query(&statement).bind(&password).execute(&pool).await?;
                    }
                    None => {
                        let statement = format!("CREATE USER {}", quote::ident(&name));
                        sqlx::query(&statement).execute(&pool).await?;
                    }
                }
                Ok::<_, ResourceError>(())
            })
            .await?;

        Ok(SqlUserState {
            id: sql_user_id(&config.cluster_id, &config.name),
            cluster_id: config.cluster_id,
            name: config.name,
            password: config.password,
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

    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State> {
        let password = plan.password.clone().ok_or_else(|| {
            ResourceError::Validation("a password is required to update a user".to_string())
        })?;
        let statement = format!("ALTER USER {} WITH PASSWORD $1", quote::ident(&state.name));
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).bind(&password).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await?;
        Ok(SqlUserState {
            password: plan.password,
            ..state
        })
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        let name = state.name.clone();
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                privileges::revoke_all(&pool, &name).await?;
                let statement = format!("DROP USER {}", quote::ident(&name));
                sqlx::query(&statement).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[async_trait]
impl Import for SqlUserResource {
    async fn import(&self, id: &str) -> ResourceResult<Self::State> {
        let (cluster_id, name) = parse_sql_user_id(id)?;
        let exists = match self.exists(&cluster_id, &name).await {
            Ok(exists) => exists,
            Err(err) if err.is_cluster_unavailable() => false,
            Err(err) => return Err(err),
        };
        if !exists {
            return Err(ResourceError::NotFound(format!("user {name:?}")));
        }
        Ok(SqlUserState {
            id: id.to_string(),
            cluster_id,
            name,
            password: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_round_trip() {
        let id = sql_user_id("cluster-1", "app_rw");
        assert_eq!(id, "user|cluster-1|app_rw");
        let (cluster, name) = parse_sql_user_id(&id).unwrap();
        assert_eq!(cluster, "cluster-1");
        assert_eq!(name, "app_rw");
    }

    #[test]
    fn user_ids_reject_other_kinds() {
        assert!(parse_sql_user_id("role|cluster-1|app_rw").is_err());
        assert!(parse_sql_user_id("user|cluster-1").is_err());
    }
}

//! Role membership grants. A grant has no mutable attributes: changing
//! either side means revoke and re-grant, so update is always an error.

use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::Lifecycle;
use async_trait::async_trait;
use scuttle_session::{quote, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ID_KIND: &str = "role_grant";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrantConfig {
    pub cluster_id: String,
    pub user_name: String,
    pub role_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrantState {
    pub id: String,
    pub cluster_id: String,
    pub user_name: String,
    pub role_name: String,
}

pub fn role_grant_id(cluster_id: &str, user_name: &str, role_name: &str) -> String {
    id::compose(ID_KIND, &[cluster_id, user_name, role_name])
}

pub struct RoleGrantResource {
    session: Arc<SessionManager>,
}

impl RoleGrantResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Lifecycle for RoleGrantResource {
    type Config = RoleGrantConfig;
    type State = RoleGrantState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        let statement = format!(
            "GRANT {} TO {}",
            quote::ident(&config.role_name),
            quote::ident(&config.user_name)
        );
        self.session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await?;

        Ok(RoleGrantState {
            id: role_grant_id(&config.cluster_id, &config.user_name, &config.role_name),
            cluster_id: config.cluster_id,
            user_name: config.user_name,
            role_name: config.role_name,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let statement = format!(
            "SELECT EXISTS(SELECT 1 FROM [SHOW GRANTS ON ROLE {}] WHERE member = $1)",
            quote::ident(&state.role_name)
        );
        let member = state.user_name.clone();
        let granted = self
            .session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let granted: bool = sqlx::query_scalar(&statement)
                    .bind(&member)
                    .fetch_one(&pool)
                    .await?;
                Ok::<_, ResourceError>(granted)
            })
            .await;

        match granted {
            Ok(true) => Ok(Some(state.clone())),
            Ok(false) => Ok(None),
            Err(err) if err.is_cluster_unavailable() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn update(&self, _plan: Self::Config, _state: Self::State) -> ResourceResult<Self::State> {
        Err(ResourceError::Validation(
            "role grants cannot be updated in place; revoke and re-grant instead".to_string(),
        ))
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        let statement = format!(
            "REVOKE {} FROM {}",
            quote::ident(&state.role_name),
            quote::ident(&state.user_name)
        );
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_ids_carry_user_and_role() {
        assert_eq!(
            role_grant_id("cluster-1", "app_rw", "readers"),
            "role_grant|cluster-1|app_rw|readers"
        );
    }
}

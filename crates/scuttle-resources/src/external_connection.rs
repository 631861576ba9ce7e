//! External connections: named aliases for sink and storage URIs.
//! The URI is immutable on the cluster, so changes require replacement;
//! the host signals that by delete-and-create.

use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::Lifecycle;
use async_trait::async_trait;
use scuttle_session::{quote, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ID_KIND: &str = "external_connection";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConnectionConfig {
    pub cluster_id: String,
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConnectionState {
    pub id: String,
    pub cluster_id: String,
    pub name: String,
    pub uri: String,
}

pub fn external_connection_id(cluster_id: &str, name: &str) -> String {
    id::compose(ID_KIND, &[cluster_id, name])
}

pub struct ExternalConnectionResource {
    session: Arc<SessionManager>,
}

impl ExternalConnectionResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Lifecycle for ExternalConnectionResource {
    type Config = ExternalConnectionConfig;
    type State = ExternalConnectionState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        let statement = format!(
            "CREATE EXTERNAL CONNECTION {} AS $1",
            quote::ident(&config.name)
        );
        let uri = config.uri.clone();
        self.session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).bind(&uri).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await?;

        Ok(ExternalConnectionState {
            id: external_connection_id(&config.cluster_id, &config.name),
            cluster_id: config.cluster_id,
            name: config.name,
            uri: config.uri,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let name = state.name.clone();
        let exists = self
            .session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM [SHOW EXTERNAL CONNECTIONS] \
                     WHERE connection_name = $1)",
                )
                .bind(&name)
                .fetch_one(&pool)
                .await?;
                Ok::<_, ResourceError>(exists)
            })
            .await;

        match exists {
            Ok(true) => Ok(Some(state.clone())),
            Ok(false) => Ok(None),
            Err(err) if err.is_cluster_unavailable() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn update(&self, _plan: Self::Config, _state: Self::State) -> ResourceResult<Self::State> {
        Err(ResourceError::Validation(
            "external connections cannot be updated in place; recreate them instead".to_string(),
        ))
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        let statement = format!("DROP EXTERNAL CONNECTION {}", quote::ident(&state.name));
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
    fn connection_ids_carry_the_kind_tag() {
        assert_eq!(
            external_connection_id("cluster-1", "kafka-sink"),
            "external_connection|cluster-1|kafka-sink"
        );
    }
}

//! Cluster settings as declared values with SET/SHOW/RESET semantics.

use crate::error::{ResourceError, ResourceResult};
use crate::{Import, Lifecycle};
use async_trait::async_trait;
use scuttle_session::{quote, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettingConfig {
    pub cluster_id: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettingState {
    pub id: String,
    pub cluster_id: String,
    pub name: String,
    pub value: String,
}

pub fn cluster_setting_id(cluster_id: &str, name: &str) -> String {
    // Settings predate the kind-tagged id scheme; their id is the bare
    // `<cluster>|<name>` pair.
    format!("{cluster_id}|{name}")
}

fn parse_cluster_setting_id(id: &str) -> ResourceResult<(String, String)> {
    let parts: Vec<&str> = id.split('|').collect();
    match parts.as_slice() {
        [cluster_id, name] => Ok((cluster_id.to_string(), name.to_string())),
        _ => Err(ResourceError::InvalidId {
            id: id.to_string(),
            reason: "expected <cluster_id>|<setting_name>".to_string(),
        }),
    }
}

pub struct ClusterSettingResource {
    session: Arc<SessionManager>,
}

impl ClusterSettingResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    async fn set(&self, cluster_id: &str, name: &str, value: &str) -> ResourceResult<()> {
        let statement = format!("SET CLUSTER SETTING {} = $1", quote::ident(name));
        let value = value.to_string();
        self.session
            .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).bind(&value).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }

    async fn get(&self, cluster_id: &str, name: &str) -> ResourceResult<String> {
        // SHOW CLUSTER SETTING yields a setting-typed column; route it
        // through a subquery to read it back as text.
        let statement = format!(
            "WITH x AS (SHOW CLUSTER SETTING {}) SELECT value::TEXT FROM x AS t(value)",
            quote::ident(name)
        );
        self.session
            .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
                let value: String = sqlx::query_scalar(&statement).fetch_one(&pool).await?;
                Ok::<_, ResourceError>(value)
            })
            .await
    }
}

#[async_trait]
impl Lifecycle for ClusterSettingResource {
    type Config = ClusterSettingConfig;
    type State = ClusterSettingState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        tracing::debug!(
            cluster = %config.cluster_id,
            setting = %config.name,
            "setting cluster setting"
        );
        self.set(&config.cluster_id, &config.name, &config.value)
            .await?;
        Ok(ClusterSettingState {
            id: cluster_setting_id(&config.cluster_id, &config.name),
            cluster_id: config.cluster_id,
            name: config.name,
            value: config.value,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let value = match self.get(&state.cluster_id, &state.name).await {
            Ok(value) => value,
            Err(err) if err.is_cluster_unavailable() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(Some(ClusterSettingState {
            value,
            ..state.clone()
        }))
    }

    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State> {
        self.set(&state.cluster_id, &state.name, &plan.value).await?;
        Ok(ClusterSettingState {
            value: plan.value,
            ..state
        })
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        let statement = format!("RESET CLUSTER SETTING {}", quote::ident(&state.name));
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(&statement).execute(&pool).await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[async_trait]
impl Import for ClusterSettingResource {
    async fn import(&self, id: &str) -> ResourceResult<Self::State> {
        let (cluster_id, name) = parse_cluster_setting_id(id)?;
        let value = self.get(&cluster_id, &name).await?;
        Ok(ClusterSettingState {
            id: id.to_string(),
            cluster_id,
            name,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_ids_have_two_segments() {
        let id = cluster_setting_id("cluster-1", "kv.rangefeed.enabled");
        assert_eq!(id, "cluster-1|kv.rangefeed.enabled");
        let (cluster, name) = parse_cluster_setting_id(&id).unwrap();
        assert_eq!(cluster, "cluster-1");
        assert_eq!(name, "kv.rangefeed.enabled");
        assert!(parse_cluster_setting_id("too|many|parts").is_err());
        assert!(parse_cluster_setting_id("justone").is_err());
    }
}

//! Cockroach Cloud control API client.
//!
//! This crate owns the only HTTP surface in the workspace: creating and
//! deleting the ephemeral SQL login on a cluster and resolving the
//! connection string used to reach it. Everything else talks to the
//! cluster over the SQL wire.
//!
//! Error bodies from the API carry a numeric engine code. Two codes are
//! expected operational states rather than failures: code 9 means the
//! cluster exists but is not ready to serve SQL yet, and code 5 means the
//! cluster does not exist. Callers use [`CloudError::is_cluster_unavailable`]
//! to treat managed objects on such clusters as absent instead of failing
//! a whole reconciliation pass.

use serde::{Deserialize, Serialize};

/// Production API host. Override with [`CloudClient::with_host`] for tests
/// or private deployments.
pub const DEFAULT_HOST: &str = "https://cockroachlabs.cloud";

/// Environment variable holding the API key when constructing from the
/// environment.
pub const API_KEY_ENV: &str = "COCKROACH_API_KEY";

pub type CloudResult<T> = std::result::Result<T, CloudError>;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("cluster not found")]
    ClusterNotFound,
    #[error("cluster not ready")]
    ClusterNotReady,
    #[error("cloud api returned status {status} (code {code}): {message}")]
    Api {
        status: u16,
        code: i64,
        message: String,
    },
    #[error("cloud api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl CloudError {
    /// True for the two expected cluster states callers may treat as
    /// "managed object absent" rather than as fatal errors.
    pub fn is_cluster_unavailable(&self) -> bool {
        matches!(self, Self::ClusterNotFound | Self::ClusterNotReady)
    }
}

/// Structured error body returned by the API on non-200 responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    #[allow(dead_code)]
    details: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SqlUserRequest<'a> {
    name: &'a str,
    password: &'a str,
}

/// Connection parameters the API reports alongside the connection string.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionParams {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: String,
    #[serde(rename = "Database")]
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionInfo {
    pub connection_string: String,
    pub params: ConnectionParams,
}

/// Client for the Cockroach Cloud control API.
///
/// Cheap to clone; the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct CloudClient {
    host: String,
    api_key: String,
    http: reqwest::Client,
}

impl CloudClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Read the API key from `COCKROACH_API_KEY`.
    pub fn from_env() -> CloudResult<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| CloudError::Config(format!("{API_KEY_ENV} is not set")))?;
        if api_key.is_empty() {
            return Err(CloudError::Config(format!("{API_KEY_ENV} is empty")));
        }
        Ok(Self::new(api_key))
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Create a SQL user on the cluster with the given password.
    pub async fn create_sql_user(
        &self,
        cluster_id: &str,
        name: &str,
        password: &str,
    ) -> CloudResult<()> {
        let url = format!("{}/api/v1/clusters/{}/sql-users", self.host, cluster_id);
        tracing::debug!(cluster = cluster_id, user = name, "creating sql user");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&SqlUserRequest { name, password })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Delete a SQL user. Deleting a user that does not exist is not an
    /// error the caller can distinguish from success here; the broker
    /// relies on that for idempotent crash cleanup.
    pub async fn delete_sql_user(&self, cluster_id: &str, name: &str) -> CloudResult<()> {
        let url = format!(
            "{}/api/v1/clusters/{}/sql-users/{}",
            self.host, cluster_id, name
        );
        tracing::debug!(cluster = cluster_id, user = name, "deleting sql user");
        let response = self.http.delete(url).bearer_auth(&self.api_key).send().await?;
        match check(response).await {
            Ok(_) => Ok(()),
            // A missing user is fine: there is nothing to clean up.
            Err(err) if matches!(err, CloudError::Api { status: 404, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Resolve the connection string for reaching the cluster as `sql_user`.
    pub async fn connection_info(
        &self,
        cluster_id: &str,
        sql_user: &str,
    ) -> CloudResult<ConnectionInfo> {
        let url = format!(
            "{}/api/v1/clusters/{}/connection-string",
            self.host, cluster_id
        );
        let response = self
            .http
            .get(url)
            .query(&[("sql_user", sql_user)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }
}

/// Map a non-200 response to a typed error, decoding the structured body.
async fn check(response: reqwest::Response) -> CloudResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: ApiErrorBody = response.json().await?;
    Err(classify(status.as_u16(), body.code, body.message))
}

fn classify(status: u16, code: i64, message: String) -> CloudError {
    match code {
        9 => CloudError::ClusterNotReady,
        5 => CloudError::ClusterNotFound,
        code => CloudError::Api {
            status,
            code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_engine_codes() {
        assert!(matches!(
            classify(400, 9, "pending".into()),
            CloudError::ClusterNotReady
        ));
        assert!(matches!(
            classify(404, 5, "gone".into()),
            CloudError::ClusterNotFound
        ));
        let other = classify(500, 13, "boom".into());
        match other {
            CloudError::Api { status, code, ref message } => {
                assert_eq!(status, 500);
                assert_eq!(code, 13);
                assert_eq!(message, "boom");
            }
            _ => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn unavailable_covers_exactly_the_two_transient_states() {
        assert!(CloudError::ClusterNotFound.is_cluster_unavailable());
        assert!(CloudError::ClusterNotReady.is_cluster_unavailable());
        assert!(!CloudError::Api {
            status: 500,
            code: 13,
            message: String::new()
        }
        .is_cluster_unavailable());
        assert!(!CloudError::Config("x".into()).is_cluster_unavailable());
    }

    #[test]
    fn error_body_decodes_with_and_without_details() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"code": 9, "message": "not ready", "details": ["a"]}"#)
                .expect("decode");
        assert_eq!(body.code, 9);
        assert_eq!(body.message, "not ready");

        let body: ApiErrorBody = serde_json::from_str(r#"{"code": 5, "message": "nope"}"#)
            .expect("decode without details");
        assert_eq!(body.code, 5);
    }

    #[test]
    fn connection_info_decodes_api_shape() {
        let info: ConnectionInfo = serde_json::from_str(
            r#"{
                "connection_string": "postgresql://u@host:26257/defaultdb?sslmode=verify-full",
                "params": {"Host": "host", "Port": "26257", "Database": "defaultdb"}
            }"#,
        )
        .expect("decode");
        assert_eq!(info.params.port, "26257");
        assert!(info.connection_string.starts_with("postgresql://"));
    }
}

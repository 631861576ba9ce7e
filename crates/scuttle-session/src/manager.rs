//! The session manager: credential broker, pool registry, scoped executor.

use crate::error::{SessionError, SessionResult};
use crate::quote;
use chrono::{DateTime, Utc};
use scuttle_cloud::CloudClient;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Well-known name of the ephemeral login. Fixed so that crash recovery
/// can delete a stale login left behind by a previous process.
pub const EPHEMERAL_USER: &str = "scuttle-lifecycle-tmp";

/// Database used when an operation has no opinion about the database.
pub const DEFAULT_DATABASE: &str = "defaultdb";

/// How long a freshly renewed credential stays valid. There is no
/// background refresh: the expiry is pushed out on every acquisition, so
/// the TTL only has to outlive a single resource operation.
const CREDENTIAL_TTL_SECONDS: i64 = 4 * 60;

/// Connections per (cluster, database) pool.
const POOL_MAX_CONNECTIONS: u32 = 5;

/// How long a caller waits for a pooled connection before failing fast.
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// The short-lived login used for all scoped SQL work on one cluster.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub password: String,
    pub valid_until: DateTime<Utc>,
}

type PoolKey = (String, String);

/// Owns the credential cache and the connection pool registry.
///
/// Construct one per process and share it (behind an `Arc`) with every
/// resource. There is deliberately no global instance.
pub struct SessionManager {
    cloud: CloudClient,
    credentials: Mutex<HashMap<String, Principal>>,
    pools: Mutex<HashMap<PoolKey, PgPool>>,
}

impl SessionManager {
    pub fn new(cloud: CloudClient) -> Self {
        Self {
            cloud,
            credentials: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn cloud(&self) -> &CloudClient {
        &self.cloud
    }

    /// Run `op` against a pool scoped to `(cluster_id, database)`.
    ///
    /// Acquires (and renews) the cluster principal, resolves the pool, and
    /// invokes the callback. Whether the callback succeeds or fails,
    /// ownership of anything it created is reassigned to `admin` before
    /// the callback's own result is returned, so no object is left owned
    /// by a login that is about to expire.
    pub async fn with_conn<T, E, F, Fut>(
        &self,
        cluster_id: &str,
        database: &str,
        op: F,
    ) -> Result<T, E>
    where
        E: From<SessionError>,
        F: FnOnce(PgPool) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let principal = self.acquire_principal(cluster_id).await?;
        let pool = self.pool(cluster_id, database, &principal).await?;

        let result = op(pool.clone()).await;

        let reassign = format!(
            "REASSIGN OWNED BY {} TO admin",
            quote::ident(&principal.username)
        );
        if let Err(err) = sqlx::query(&reassign).execute(&pool).await {
            // The next acquisition recreates the login anyway; losing the
            // reassignment only matters if the callback created objects,
            // so surface it loudly without clobbering the real result.
            tracing::warn!(
                cluster = cluster_id,
                error = %err,
                "ownership reassignment after scoped execution failed"
            );
        }

        result
    }

    /// Guarantee a valid, non-expired principal for the cluster.
    ///
    /// All acquisitions serialize through one lock. On a cache miss any
    /// pre-existing login of the well-known name is deleted first (a
    /// previous process may have crashed while holding one), then a fresh
    /// login with a random password is created. Hit or miss, the expiry is
    /// pushed out; this is the only renewal mechanism.
    async fn acquire_principal(&self, cluster_id: &str) -> SessionResult<Principal> {
        let mut credentials = self.credentials.lock().await;
        let principal = match credentials.entry(cluster_id.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!(cluster = cluster_id, "reusing cached principal");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                tracing::debug!(cluster = cluster_id, "creating principal");
                self.cloud
                    .delete_sql_user(cluster_id, EPHEMERAL_USER)
                    .await?;
                let principal = Principal {
                    username: EPHEMERAL_USER.to_string(),
                    password: Uuid::new_v4().to_string(),
                    valid_until: Utc::now(),
                };
                self.cloud
                    .create_sql_user(cluster_id, &principal.username, &principal.password)
                    .await?;
                entry.insert(principal)
            }
        };

        // Renewal runs on every acquisition, including the one that just
        // created the login.
        let pool = self.pool(cluster_id, DEFAULT_DATABASE, principal).await?;
        let valid_until = Utc::now() + chrono::Duration::seconds(CREDENTIAL_TTL_SECONDS);
        let alter = format!(
            "ALTER USER {} WITH VALID UNTIL $1",
            quote::ident(&principal.username)
        );
        sqlx::query(&alter)
            .bind(valid_until.to_rfc3339())
            .execute(&pool)
            .await?;
        principal.valid_until = valid_until;

        Ok(principal.clone())
    }

    /// Fetch or lazily create the pool for `(cluster_id, database)`.
    ///
    /// Creation resolves connection parameters through the cloud API and
    /// authenticates as the given principal. Every new physical
    /// connection elevates its session to the `admin` role so objects
    /// created through it are owned by a stable identity. Pools are never
    /// evicted; the process is short-lived.
    async fn pool(
        &self,
        cluster_id: &str,
        database: &str,
        principal: &Principal,
    ) -> SessionResult<PgPool> {
        let mut pools = self.pools.lock().await;
        let key = (cluster_id.to_string(), database.to_string());
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        tracing::debug!(cluster = cluster_id, database, "creating connection pool");
        let info = self
            .cloud
            .connection_info(cluster_id, &principal.username)
            .await?;
        let options = PgConnectOptions::from_str(&info.connection_string)?
            .username(&principal.username)
            .password(&principal.password)
            .database(database);

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // Objects must end up owned by the stable admin role,
                    // not the ephemeral login this pool authenticates as.
                    conn.execute("SET ROLE admin").await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        pools.insert(key, pool.clone());
        Ok(pool)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

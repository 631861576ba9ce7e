//! Declarative lifecycle implementations for CockroachDB cluster objects.
//!
//! Each module manages one object kind: given a declared configuration it
//! computes the SQL that brings a cluster into the desired state, and it
//! reads the cluster back to detect drift. All SQL runs through
//! [`scuttle_session::SessionManager::with_conn`], which brokers the
//! ephemeral credential and guarantees ownership cleanup.
//!
//! The interesting state machines live in [`changefeed`] (option-set
//! reconciliation around a pause/alter/resume sequence) and [`backup`]
//! (recovering structured schedule state from stored statement text).
//! The remaining resources are thin templated DDL.

pub mod backup;
pub mod changefeed;
pub mod cluster_setting;
pub mod cursor;
mod error;
pub mod external_connection;
pub mod id;
pub mod migration;
pub mod role_grant;
pub mod sql_role;
pub mod sql_user;
pub mod validate;

mod privileges;
mod saga;

pub use error::{ResourceError, ResourceResult};

use async_trait::async_trait;

/// The lifecycle seam every resource implements.
///
/// The hosting process (plugin framework, CLI, test harness) drives these
/// four operations; the implementations here contain all cluster-facing
/// logic. `read` returns `None` when the managed object no longer exists
/// (including when the cluster itself is not found or not ready), which a
/// host maps to "remove from state".
#[async_trait]
pub trait Lifecycle {
    type Config: Send;
    type State: Send + Sync;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State>;
    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>>;
    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State>;
    async fn delete(&self, state: Self::State) -> ResourceResult<()>;
}

/// Implemented by resources that can adopt a pre-existing cluster object
/// from its composite id.
#[async_trait]
pub trait Import: Lifecycle {
    async fn import(&self, id: &str) -> ResourceResult<Self::State>;
}

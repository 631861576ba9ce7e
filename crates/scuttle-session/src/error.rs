use crate::watch::JobStatus;
use scuttle_cloud::CloudError;
use thiserror::Error;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job {job_id} never reached {expected} (last observed status: {last})")]
    JobStatusTimeout {
        job_id: i64,
        expected: JobStatus,
        last: String,
    },
    #[error("unknown job status {0:?}")]
    UnknownJobStatus(String),
}

impl SessionError {
    /// True when the underlying cause is a cluster that is not found or
    /// not ready yet. Callers may treat managed objects as absent instead
    /// of failing the operation.
    pub fn is_cluster_unavailable(&self) -> bool {
        matches!(self, Self::Cloud(cloud) if cloud.is_cluster_unavailable())
    }
}

use scuttle_session::SessionError;
use thiserror::Error;

pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("validation: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("option {name} cannot be changed after creation (current: {current:?}, requested: {requested:?})")]
    ImmutableOption {
        name: &'static str,
        current: String,
        requested: String,
    },
    #[error("changefeed cursor has expired: {0}")]
    ExpiredCursor(String),
    #[error("job {job_id} is in unexpected state {status:?}")]
    JobState { job_id: i64, status: String },
    #[error("unable to parse {context}: {detail}")]
    Parse {
        context: &'static str,
        detail: String,
    },
    #[error("invalid resource id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ResourceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Session(SessionError::Database(err))
    }
}

impl ResourceError {
    /// True when the cluster itself is not found or not ready. Read paths
    /// use this to report the managed object as absent instead of failing.
    pub fn is_cluster_unavailable(&self) -> bool {
        matches!(self, Self::Session(session) if session.is_cluster_unavailable())
    }
}

//! Bounded polling of a cluster job until it reaches an expected status.

use crate::error::{SessionError, SessionResult};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Delay between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Poll attempts before giving up. Combined with [`POLL_INTERVAL`] this
/// bounds how long a caller can block on a job transition.
pub const POLL_ATTEMPTS: u32 = 20;

/// Job states the cluster reports for long-running jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Paused,
    Canceling,
    Canceled,
    Failed,
    Succeeded,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        }
    }

    /// A terminal job can never produce further output. A canceling job is
    /// treated as terminal: it will not accept updates and its cursor
    /// ownership can be handed over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceling | Self::Canceled | Self::Failed | Self::Succeeded
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SessionError;

    fn from_str(input: &str) -> SessionResult<Self> {
        match input {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            "failed" => Ok(Self::Failed),
            "succeeded" => Ok(Self::Succeeded),
            other => Err(SessionError::UnknownJobStatus(other.to_string())),
        }
    }
}

/// Poll `job_id` until it reports `expected`, up to [`POLL_ATTEMPTS`].
///
/// Returns on the first match; after the attempt ceiling the error
/// carries the last status observed. This is a bounded retry, not an
/// indefinite wait: callers must treat a timeout as a hard failure and
/// run their own compensation (for example cancel a just-created job).
pub async fn wait_for_status(
    pool: &PgPool,
    job_id: i64,
    expected: JobStatus,
) -> SessionResult<()> {
    let query = format!("SELECT status FROM [SHOW CHANGEFEED JOB {job_id}]");
    let mut last = String::from("unknown");
    for attempt in 0..POLL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let status: String = sqlx::query_scalar(&query).fetch_one(pool).await?;
        if status == expected.as_str() {
            return Ok(());
        }
        tracing::debug!(
            job_id,
            status = %status,
            waiting_for = %expected,
            attempt,
            "job not yet in expected state"
        );
        last = status;
    }
    Err(SessionError::JobStatusTimeout {
        job_id,
        expected,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Canceling,
            JobStatus::Canceled,
            JobStatus::Failed,
            JobStatus::Succeeded,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("resumed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_states_match_cursor_handover_rules() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(JobStatus::Canceling.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
    }
}

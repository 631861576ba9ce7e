//! Explicit compensation for multi-statement sequences.
//!
//! Cluster-side sequences here are not transactions: creating a job and
//! claiming its cursor are separate statements, and a failure in between
//! leaves real state behind. A [`Saga`] makes the recovery policy
//! explicit: each completed forward step registers its compensating
//! action, and aborting runs the registered compensations in reverse
//! order before handing the original error back. Compensation failures
//! are logged and do not mask the cause.

use crate::error::{ResourceError, ResourceResult};
use std::future::Future;
use std::pin::Pin;

type CompensationFuture = Pin<Box<dyn Future<Output = ResourceResult<()>> + Send>>;
type Compensation = Box<dyn FnOnce() -> CompensationFuture + Send>;

#[derive(Default)]
pub(crate) struct Saga {
    compensations: Vec<(&'static str, Compensation)>,
}

impl Saga {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the compensating action for a forward step that just
    /// completed.
    pub fn on_abort<F, Fut>(&mut self, label: &'static str, compensation: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ResourceResult<()>> + Send + 'static,
    {
        self.compensations
            .push((label, Box::new(move || Box::pin(compensation()))));
    }

    /// Unwind: run every registered compensation, most recent first, and
    /// return the causing error for propagation.
    pub async fn abort(self, cause: ResourceError) -> ResourceError {
        for (label, compensation) in self.compensations.into_iter().rev() {
            tracing::warn!(step = label, cause = %cause, "running compensating action");
            if let Err(err) = compensation().await {
                tracing::warn!(
                    step = label,
                    error = %err,
                    "compensating action failed; manual cleanup may be needed"
                );
            }
        }
        cause
    }

    /// The sequence completed; drop the compensations without running
    /// them.
    pub fn commit(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn abort_runs_compensations_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut saga = Saga::new();
        for step in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            saga.on_abort(step, move || async move {
                order.lock().unwrap().push(step);
                Ok(())
            });
        }

        let cause = saga
            .abort(ResourceError::Conflict("boom".to_string()))
            .await;
        assert!(matches!(cause, ResourceError::Conflict(_)));
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failed_compensations_do_not_mask_the_cause() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut saga = Saga::new();
        {
            let ran = Arc::clone(&ran);
            saga.on_abort("works", move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        saga.on_abort("fails", || async {
            Err(ResourceError::Validation("compensation broke".to_string()))
        });

        let cause = saga
            .abort(ResourceError::Conflict("original".to_string()))
            .await;
        assert!(matches!(cause, ResourceError::Conflict(message) if message == "original"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commit_discards_compensations() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut saga = Saga::new();
        let counter = Arc::clone(&ran);
        saga.on_abort("never", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        saga.commit();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}

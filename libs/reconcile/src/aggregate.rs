//! Collecting per-kind failures across a pass.

use tracing::warn;

use crate::error::{AggregateError, KindFailure, ReconcileError};

/// Collects independent per-kind results so one failure never stops the
/// remaining kinds from being attempted.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    attempted: usize,
    failures: Vec<KindFailure>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one kind's attempt, returning the success value.
    pub fn record<T>(&mut self, kind: impl Into<String>, result: Result<T, ReconcileError>) -> Option<T> {
        self.attempted += 1;
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                let kind = kind.into();
                warn!(kind = %kind, error = %error, "Child kind failed");
                self.failures.push(KindFailure { kind, error });
                None
            }
        }
    }

    /// Record a failure that happened before the kind could be attempted.
    pub fn push_failure(&mut self, kind: impl Into<String>, error: ReconcileError) {
        self.record::<()>(kind, Err(error));
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line description of the failures, empty when there are none.
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            return String::new();
        }
        AggregateError {
            attempted: self.attempted,
            failures: self.failures.clone(),
        }
        .to_string()
    }

    /// `Ok(())` if every kind succeeded, the aggregate error otherwise.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError {
                attempted: self.attempted,
                failures: self.failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_all_success() {
        let mut agg = ErrorAggregator::new();
        assert_eq!(agg.record("Service", Ok(1)), Some(1));
        assert_eq!(agg.record("Deployment", Ok(2)), Some(2));
        assert!(agg.is_empty());
        assert_eq!(agg.summary(), "");
        assert!(agg.into_result().is_ok());
    }

    #[test]
    fn test_failures_do_not_stop_later_kinds() {
        let mut agg = ErrorAggregator::new();
        agg.record::<()>("Service", Err(StoreError::Transient("reset".to_string()).into()));
        assert_eq!(agg.record("Deployment", Ok(())), Some(()));
        agg.push_failure("VirtualService", ReconcileError::InvalidSpec("bad".to_string()));

        assert_eq!(agg.attempted(), 3);
        let err = agg.into_result().unwrap_err();
        assert_eq!(err.attempted, 3);
        assert_eq!(err.failed_kinds(), vec!["Service", "VirtualService"]);
    }
}

//! Ordered fallback tiers for external collaborators.
//!
//! Every collaborator call goes through [`resolve_tiers`]: the primary tier runs
//! under a bounded timeout, its result is accepted or rejected by a predicate,
//! and anything else (error, timeout, rejection) falls through to a local
//! deterministic tier. Errors never escape.

use std::future::Future;
use std::time::Duration;

use crate::error::CollaboratorError;

/// Which tier produced a value.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome<T> {
    Primary(T),
    Fallback(T),
    Unavailable,
}

impl<T> TierOutcome<T> {
    pub fn tier(&self) -> &'static str {
        match self {
            TierOutcome::Primary(_) => "primary",
            TierOutcome::Fallback(_) => "fallback",
            TierOutcome::Unavailable => "unavailable",
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            TierOutcome::Primary(value) | TierOutcome::Fallback(value) => Some(value),
            TierOutcome::Unavailable => None,
        }
    }
}

/// Run a collaborator future with a hard time budget.
pub async fn with_timeout<T, F>(
    collaborator: &'static str,
    budget: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            collaborator,
            millis: budget.as_millis() as u64,
        }),
    }
}

/// Try the primary tier, then the fallback. First accepted value wins.
pub async fn resolve_tiers<T, F>(
    collaborator: &'static str,
    budget: Duration,
    primary: F,
    accept: impl FnOnce(&T) -> bool,
    fallback: impl FnOnce() -> Option<T>,
) -> TierOutcome<T>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match with_timeout(collaborator, budget, primary).await {
        Ok(value) => {
            if accept(&value) {
                return TierOutcome::Primary(value);
            }
            tracing::debug!(collaborator, "Primary result not accepted, using fallback tier");
        }
        Err(CollaboratorError::Unavailable(_)) => {
            tracing::debug!(collaborator, "Primary tier not configured, using fallback tier");
        }
        Err(err) => {
            tracing::warn!(collaborator, error = %err, "Primary tier failed, using fallback tier");
        }
    }

    match fallback() {
        Some(value) => TierOutcome::Fallback(value),
        None => TierOutcome::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepted_primary_wins() {
        let outcome = resolve_tiers(
            "test",
            Duration::from_secs(1),
            async { Ok::<_, CollaboratorError>(0.9) },
            |v: &f64| *v >= 0.7,
            || Some(0.1),
        )
        .await;
        assert_eq!(outcome, TierOutcome::Primary(0.9));
    }

    #[tokio::test]
    async fn rejected_primary_falls_through() {
        let outcome = resolve_tiers(
            "test",
            Duration::from_secs(1),
            async { Ok::<_, CollaboratorError>(0.4) },
            |v: &f64| *v >= 0.7,
            || Some(0.1),
        )
        .await;
        assert_eq!(outcome, TierOutcome::Fallback(0.1));
    }

    #[tokio::test]
    async fn primary_error_without_fallback_is_unavailable() {
        let outcome: TierOutcome<f64> = resolve_tiers(
            "test",
            Duration::from_secs(1),
            async { Err(CollaboratorError::Transport("connection reset".into())) },
            |_| true,
            || None,
        )
        .await;
        assert_eq!(outcome, TierOutcome::Unavailable);
        assert_eq!(outcome.tier(), "unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primary_times_out() {
        let outcome = resolve_tiers(
            "test",
            Duration::from_millis(50),
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, CollaboratorError>("late")
            },
            |_| true,
            || Some("fallback"),
        )
        .await;
        assert_eq!(outcome, TierOutcome::Fallback("fallback"));
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_reports_budget() {
        let err = with_timeout("classifier", Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), CollaboratorError>(())
        })
        .await
        .expect_err("call should time out");
        assert!(matches!(
            err,
            CollaboratorError::Timeout {
                collaborator: "classifier",
                millis: 20
            }
        ));
    }
}

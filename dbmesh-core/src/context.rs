//! Per-call deadlines and cancellation.
//!
//! Every blocking call takes a [`CallContext`]. The context races the call
//! against its deadline and its cancellation token; the losing future is
//! dropped, which releases any result set or pooled handle it held.
//!
//! ```rust
//! use std::time::Duration;
//! use dbmesh_core::CallContext;
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(2));
//! let token = ctx.cancellation_token();
//! token.cancel();
//! assert!(ctx.is_cancelled());
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{DbError, DbResult};

/// Deadline and cancellation signal for one call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    budget: Option<Duration>,
    token: CancellationToken,
}

impl CallContext {
    /// A context with no deadline and a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// A context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// Set the deadline to `timeout` from now, keeping an earlier one.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        match self.deadline {
            Some(existing) if existing <= candidate => {}
            _ => {
                self.deadline = Some(candidate);
                self.budget = Some(timeout);
            }
        }
        self
    }

    /// A child context: cancelled with this one, and optionally bounded by a
    /// tighter deadline of its own.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let child = Self {
            deadline: self.deadline,
            budget: self.budget,
            token: self.token.child_token(),
        };
        match timeout {
            Some(t) => child.timeout(t),
            None => child,
        }
    }

    /// The token that cancels this context.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Check whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn budget_ms(&self) -> u64 {
        self.budget
            .map(|b| u64::try_from(b.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Run `fut` under this context.
    ///
    /// Returns [`DbError::Cancelled`] or [`DbError::Timeout`] if the token
    /// fires or the deadline passes first; `fut` is dropped in both cases.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        if self.token.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DbError::timeout(operation, self.budget_ms()));
            }
        }

        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DbError::cancelled(operation)),
            _ = expiry => Err(DbError::timeout(operation, self.budget_ms())),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_through() {
        let ctx = CallContext::new();
        let value = ctx.run("query", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let err = ctx
            .run("query", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "query timed out after 50ms");
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let ctx = CallContext::new();
        let token = ctx.cancellation_token();

        let handle = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                ctx.run("exec", async {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
            }
        });
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_work() {
        let ctx = CallContext::new();
        ctx.cancellation_token().cancel();

        let mut ran = false;
        let result = ctx
            .run("query", async {
                ran = true;
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let parent = CallContext::with_timeout(Duration::from_secs(1));
        let child = parent.child(Some(Duration::from_secs(5)));
        assert!(child.remaining().unwrap() <= Duration::from_secs(1));

        let tighter = parent.child(Some(Duration::from_millis(100)));
        assert!(tighter.remaining().unwrap() <= Duration::from_millis(100));

        parent.cancellation_token().cancel();
        assert!(child.is_cancelled());
    }
}

//! Call context: cancellation, deadline and request correlation
//!
//! Every `Function::call` and every remote resolution receives a
//! [`CallContext`]. Network portals run their round trips through
//! [`CallContext::run`], so cancelling the context (or letting its deadline
//! pass) aborts an in-flight HTTP request or WebSocket exchange with an error
//! instead of hanging.

use crate::error::{PortalError, PortalResult};
use crate::request_id;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation scope of a call
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    request_id: String,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A context with no deadline and a fresh request id
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            request_id: request_id::generate(),
        }
    }

    /// Same as [`CallContext::new`] with a deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Tighten the deadline to at most `timeout` from now
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Replace the request id (e.g. one received in an `x-request-id` header)
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// A context cancelled together with this one, but cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            request_id: self.request_id.clone(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when no deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fail fast when the context is already done
    pub fn check(&self) -> PortalResult<()> {
        if self.is_cancelled() {
            return Err(PortalError::cancelled(format!(
                "request {} was cancelled",
                self.request_id
            )));
        }
        if self.is_expired() {
            return Err(PortalError::timeout(
                format!("request {} exceeded its deadline", self.request_id),
                0,
            ));
        }
        Ok(())
    }

    /// Resolves when the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` until it completes, the context is cancelled or the deadline
    /// passes, whichever comes first
    pub async fn run<F, T>(&self, fut: F) -> PortalResult<T>
    where
        F: Future<Output = PortalResult<T>>,
    {
        self.check()?;
        let remaining = self.remaining();

        let deadline = async {
            match remaining {
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = self.token.cancelled() => Err(PortalError::cancelled(format!(
                "request {} was cancelled",
                self.request_id
            ))),
            _ = deadline => Err(PortalError::timeout(
                format!("request {} exceeded its deadline", self.request_id),
                remaining.map(|d| d.as_millis() as u64).unwrap_or_default(),
            )),
        }
    }
}

//! Backend adapter contract
//!
//! A backend speaks to one external service and turns its responses into
//! [`Record`] batches. The view drives it through [`Backend::fetch`]; the
//! adapter pushes results through the [`CallScope`] it is handed and may fan
//! out tracked secondary calls (per-record avatar or thumbnail fetches) with
//! [`CallScope::spawn`]. A cycle publishes only once every call it spawned
//! has finished.

use crate::call_tracker::CallId;
use async_trait::async_trait;
use feedmux_common::{Params, Record};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Errors an adapter may report for one call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network or IO failure; the call contributes nothing
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials rejected; surfaced as a capability change
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Upstream returned something unparseable
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Adapter for one external feed service
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Service name used in bus paths and cache keys (e.g. "dummy")
    fn name(&self) -> &str;

    /// Capabilities that never change (e.g. "has-update-status-iface")
    fn static_caps(&self) -> Vec<String> {
        Vec::new()
    }

    /// Capabilities that depend on runtime state (e.g. "credentials-valid")
    fn dynamic_caps(&self) -> Vec<String> {
        Vec::new()
    }

    /// Check credentials before a fetch
    ///
    /// An `Err(BackendError::Auth)` here means no fetch is attempted.
    async fn authenticate(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Fetch `query` with `params`, submitting records through `scope`
    ///
    /// Batches are staged until the cycle completes. Returning `Err` drops
    /// every batch this call submitted; batches of other calls are kept.
    async fn fetch(
        &self,
        query: &str,
        params: &Params,
        scope: CallScope,
    ) -> Result<(), BackendError>;
}

/// Message from a running call to its view
#[derive(Debug)]
pub(crate) enum CallMessage {
    /// A secondary call was spawned and must finish before publish
    Registered {
        call: CallId,
        label: String,
        token: CancellationToken,
    },
    /// A batch of records from a call
    Batch { call: CallId, records: Vec<Record> },
    /// A call completed
    Finished {
        call: CallId,
        result: Result<(), BackendError>,
    },
}

/// Handle a backend call uses to report into its view
///
/// Submissions after cancellation are dropped silently.
#[derive(Debug, Clone)]
pub struct CallScope {
    call: CallId,
    token: CancellationToken,
    cycle: CancellationToken,
    next_seq: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<CallMessage>,
}

impl CallScope {
    /// Scope for the root call of `generation`
    pub(crate) fn root(
        generation: u64,
        cycle: CancellationToken,
        tx: mpsc::UnboundedSender<CallMessage>,
    ) -> Self {
        Self {
            call: CallId::root(generation),
            token: cycle.child_token(),
            cycle,
            next_seq: Arc::new(AtomicU64::new(1)),
            tx,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this call is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Stage a batch of records for the cycle
    pub fn submit(&self, records: Vec<Record>) {
        if records.is_empty() || self.token.is_cancelled() {
            return;
        }
        let _ = self.tx.send(CallMessage::Batch {
            call: self.call,
            records,
        });
    }

    /// Spawn a tracked secondary call
    ///
    /// The call is registered with the view before it starts running, so the
    /// cycle cannot publish until it finishes.
    pub fn spawn<F, Fut>(&self, label: impl Into<String>, f: F)
    where
        F: FnOnce(CallScope) -> Fut,
        Fut: Future<Output = Result<(), BackendError>> + Send + 'static,
    {
        if self.cycle.is_cancelled() {
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let child = CallScope {
            call: CallId {
                generation: self.call.generation,
                seq,
            },
            token: self.cycle.child_token(),
            cycle: self.cycle.clone(),
            next_seq: Arc::clone(&self.next_seq),
            tx: self.tx.clone(),
        };

        let registered = CallMessage::Registered {
            call: child.call,
            label: label.into(),
            token: child.token.clone(),
        };
        if self.tx.send(registered).is_err() {
            return;
        }

        let fut = f(child.clone());
        tokio::spawn(run_call(child, fut));
    }
}

/// Drive one call to completion and report the outcome
///
/// A cancelled call reports nothing.
pub(crate) async fn run_call<Fut>(scope: CallScope, fut: Fut)
where
    Fut: Future<Output = Result<(), BackendError>> + Send + 'static,
{
    let result = tokio::select! {
        biased;
        _ = scope.token.cancelled() => {
            trace!(call = %scope.call, "Call cancelled");
            return;
        }
        result = fut => result,
    };

    let _ = scope.tx.send(CallMessage::Finished {
        call: scope.call,
        result,
    });
}

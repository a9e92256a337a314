//! Continuation-driven retry harness.
//!
//! Keeps an operation alive for exactly as long as a continuation predicate
//! says the owning instance could still produce output. Used for listing the
//! supervisor's tasks and for keeping a terminal listen open.

use crate::instance_store::InstanceStore;
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Decides on every failure whether retrying is still meaningful
#[async_trait]
pub trait ContinuationPredicate: Send + Sync {
    async fn should_continue(&self) -> bool;
}

/// Retries until cancelled
pub struct AlwaysContinue;

#[async_trait]
impl ContinuationPredicate for AlwaysContinue {
    async fn should_continue(&self) -> bool {
        true
    }
}

/// Continues while the instance's phase says the supervisor could still answer.
///
/// Re-reads the durable store on every call; the phase can flip at any time.
pub struct ContinueWhileRunning {
    store: Arc<dyn InstanceStore>,
    instance_id: String,
}

impl ContinueWhileRunning {
    pub fn new(store: Arc<dyn InstanceStore>, instance_id: &str) -> Self {
        Self {
            store,
            instance_id: instance_id.to_string(),
        }
    }
}

#[async_trait]
impl ContinuationPredicate for ContinueWhileRunning {
    async fn should_continue(&self) -> bool {
        match self.store.find_instance_by_id(&self.instance_id).await {
            Ok(Some(instance)) => instance.phase.is_supervisor_available_soon(),
            Ok(None) => false,
            Err(e) => {
                warn!(
                    "Failed to look up instance {} while retrying: {}",
                    self.instance_id, e
                );
                false
            }
        }
    }
}

/// How an operation failed
#[derive(Debug)]
pub enum RetryError<E> {
    /// Worth another attempt if the predicate agrees
    Retry(E),
    /// Do not retry; surfaced to the caller as is
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Retry(e) | RetryError::Fatal(e) => e,
        }
    }
}

enum RetryState<T, E> {
    Retrying { attempt: u32 },
    Waiting { attempt: u32, error: E },
    Done(T),
    Failed(E),
    Aborted,
}

/// Fixed-interval retry loop bounded by a continuation predicate
#[derive(Debug, Clone)]
pub struct RetryHarness {
    interval: Duration,
}

impl RetryHarness {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `op` until it succeeds, fails fatally, the predicate gives up or `cancel` fires.
    ///
    /// Returns `Ok(None)` when aborted by the predicate or by cancellation.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, Op, Fut>(
        &self,
        description: &str,
        cancel: &CancellationToken,
        predicate: &dyn ContinuationPredicate,
        mut op: Op,
    ) -> Result<Option<T>, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RetryError<E>>>,
        E: Display,
    {
        let mut state = RetryState::Retrying { attempt: 1 };
        loop {
            state = match state {
                RetryState::Retrying { attempt } => {
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = op(attempt) => Some(result),
                    };
                    match outcome {
                        None => RetryState::Aborted,
                        Some(Ok(value)) => RetryState::Done(value),
                        Some(Err(RetryError::Fatal(error))) => RetryState::Failed(error),
                        Some(Err(RetryError::Retry(error))) => {
                            RetryState::Waiting { attempt, error }
                        }
                    }
                }
                RetryState::Waiting { attempt, error } => {
                    let proceed = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        keep_going = predicate.should_continue() => keep_going,
                    };
                    if !proceed {
                        debug!("Giving up to {} after {} attempt(s): {}", description, attempt, error);
                        RetryState::Aborted
                    } else {
                        debug!("Unable to {}, retrying in {:?}: {}", description, self.interval, error);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => RetryState::Aborted,
                            _ = tokio::time::sleep(self.interval) => {
                                RetryState::Retrying { attempt: attempt + 1 }
                            }
                        }
                    }
                }
                RetryState::Done(value) => return Ok(Some(value)),
                RetryState::Failed(error) => return Err(error),
                RetryState::Aborted => return Ok(None),
            };
        }
    }
}

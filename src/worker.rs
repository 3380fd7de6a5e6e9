//! # Failure-Propagating Worker
//!
//! A [`Worker`] wraps a spawned tokio task whose body may fail. A plain
//! `tokio::spawn` would leave the failure sitting in the `JoinHandle` until somebody
//! happens to look. The worker catches both error returns and panics inside the task,
//! records them, and hands them back from [`Worker::join`], so the owner always learns
//! that its background work died.
//!
//! The failure is also readable earlier through [`Worker::last_failure`] for owners
//! that want to poll instead of join.

use std::{
    any::Any,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
    time::Duration,
};

use futures::FutureExt;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error};

/// What went wrong inside a worker body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Worker '{worker}' threw: {message}")]
pub struct WorkerFailure {
    pub worker: String,
    pub message: String,
    pub panicked: bool,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Failed(#[from] WorkerFailure),

    #[error("Worker '{worker}' did not finish within {timeout:?}")]
    Timeout { worker: String, timeout: Duration },

    #[error("Worker '{worker}' was cancelled")]
    Cancelled { worker: String },

    #[error("Worker '{worker}' was already joined")]
    AlreadyJoined { worker: String },

    #[error("No tokio runtime available to spawn worker '{worker}'")]
    NoRuntime { worker: String },
}

pub type WorkerResult<T> = Result<T, WorkerError>;

pub struct Worker {
    name: String,
    handle: Option<JoinHandle<Result<(), WorkerFailure>>>,
    failure: Arc<RwLock<Option<WorkerFailure>>>,
}

impl Worker {
    /// Spawns `body` on the current tokio runtime.
    pub fn spawn<F, E>(name: impl Into<String>, body: F) -> WorkerResult<Self>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let name = name.into();
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            WorkerError::NoRuntime {
                worker: name.clone(),
            }
        })?;

        let failure = Arc::new(RwLock::new(None));
        let slot = failure.clone();
        let worker = name.clone();
        let handle = runtime.spawn(async move {
            debug!("Worker '{}' started", worker);
            let outcome = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!("Worker '{}' finished", worker);
                    return Ok(());
                }
                Ok(Err(e)) => WorkerFailure {
                    worker,
                    message: e.to_string(),
                    panicked: false,
                },
                Err(panic) => WorkerFailure {
                    worker,
                    message: panic_message(panic.as_ref()),
                    panicked: true,
                },
            };
            error!("{}", outcome);
            if let Ok(mut guard) = slot.write() {
                *guard = Some(outcome.clone());
            }
            Err(outcome)
        });

        Ok(Self {
            name,
            handle: Some(handle),
            failure,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// The recorded failure, available as soon as the body has failed.
    pub fn last_failure(&self) -> Option<WorkerFailure> {
        self.failure.read().ok().and_then(|guard| guard.clone())
    }

    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// A handle that can abort the task while the worker itself is being joined.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.handle.as_ref().map(JoinHandle::abort_handle)
    }

    /// Waits for the body to finish and re-raises its failure, if any.
    ///
    /// With a `timeout`, gives up after that long and returns
    /// [`WorkerError::Timeout`]; the worker keeps running and can be joined again.
    pub async fn join(&mut self, timeout: Option<Duration>) -> WorkerResult<()> {
        let Some(mut handle) = self.handle.take() else {
            return Err(WorkerError::AlreadyJoined {
                worker: self.name.clone(),
            });
        };

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(result) => result,
                Err(_) => {
                    self.handle = Some(handle);
                    return Err(WorkerError::Timeout {
                        worker: self.name.clone(),
                        timeout: limit,
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(WorkerError::Failed(failure)),
            Err(e) if e.is_cancelled() => Err(WorkerError::Cancelled {
                worker: self.name.clone(),
            }),
            Err(e) => Err(WorkerError::Failed(WorkerFailure {
                worker: self.name.clone(),
                message: e.to_string(),
                panicked: true,
            })),
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked with a non-string payload".to_string()
    }
}

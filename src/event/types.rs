use async_trait::async_trait;
use thiserror::Error;

use crate::{port::PortError, service::Service, service::ServiceError, timestamp::Timestamp};

/// What the owning service should do after an event ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    Continue,
    /// Terminate the service. Returned by [`StopEvent`].
    Stop,
}

/// A unit of scheduled work.
///
/// Events are ordered by [`Event::timestamp`] only. The queue captures the timestamp
/// when the event is pushed, so it must not change afterwards.
///
/// `execute` runs on the owning service's worker in asynchronous mode and must not
/// block indefinitely; every other event of that service waits behind it.
#[async_trait]
pub trait Event: Send + Sync {
    fn timestamp(&self) -> Timestamp;

    /// Label used in logs and by cancellation predicates.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn execute(&self, service: &Service) -> ExecutionResult<EventFlow>;
}

/// Sentinel that halts the worker of the service executing it.
#[derive(Debug, Clone)]
pub struct StopEvent {
    at: Timestamp,
}

impl StopEvent {
    pub fn new(at: Timestamp) -> Self {
        Self { at }
    }

    pub fn now() -> Self {
        Self::new(Timestamp::now())
    }
}

#[async_trait]
impl Event for StopEvent {
    fn timestamp(&self) -> Timestamp {
        self.at
    }

    fn name(&self) -> &str {
        "stop"
    }

    async fn execute(&self, _service: &Service) -> ExecutionResult<EventFlow> {
        Ok(EventFlow::Stop)
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Event '{event}' failed: {message}")]
    Failed { event: String, message: String },

    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Service error: {0}")]
    Service(Box<ServiceError>),
}

impl ExecutionError {
    pub fn failed<E: Into<String>, M: Into<String>>(event: E, message: M) -> Self {
        ExecutionError::Failed {
            event: event.into(),
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ExecutionError {
    fn from(error: ServiceError) -> Self {
        ExecutionError::Service(Box::new(error))
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

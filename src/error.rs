use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::event::{ExecutionError, QueueError};
use crate::port::{CodecError, PortError};
use crate::service::ServiceError;
use crate::worker::WorkerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),
    // events
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    // transport
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Port error: {0}")]
    Port(#[from] PortError),
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    // services
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}

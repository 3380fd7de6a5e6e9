//! # Service
//!
//! A [`Service`] owns a timeline of events and runs them in one of two modes.
//!
//! - **Sync**: [`Service::add_event`] executes the event inline and returns once it
//!   has run. There is no worker and no queue.
//! - **Async**: [`Service::add_event`] pushes into the service's own
//!   [`PriorityQueue`] and returns at once. After [`Service::start`] a worker pops
//!   events in timestamp order and executes them until it meets a [`StopEvent`]
//!   (or any event returning [`EventFlow::Stop`]), [`Service::stop`] is called, or an
//!   event fails.
//!
//! A failing event ends the worker. The failure is kept and handed back by
//! [`Service::join`]; [`Service::last_failure`] shows it earlier.
//!
//! [`StopEvent`]: crate::event::StopEvent

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace};

use crate::{
    config::ServiceConfig,
    event::{Event, EventFlow, ExecutionError, PriorityQueue, QueueError, ScheduledEvent},
    worker::{Worker, WorkerError, WorkerFailure},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceMode {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service '{service}' ({mode}): {operation} is not valid in state {state}")]
    InvalidOperation {
        service: String,
        mode: ServiceMode,
        state: ServiceState,
        operation: String,
    },

    #[error("Service worker failed: {0}")]
    WorkerFailure(WorkerFailure),

    #[error("Event execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Worker error: {0}")]
    Worker(WorkerError),
}

impl From<WorkerError> for ServiceError {
    fn from(error: WorkerError) -> Self {
        match error {
            WorkerError::Failed(failure) => ServiceError::WorkerFailure(failure),
            other => ServiceError::Worker(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Called once when a service reaches [`ServiceState::Stopped`].
pub type ExitCallback = Box<dyn FnOnce() + Send>;

struct ServiceInner {
    name: String,
    mode: ServiceMode,
    config: ServiceConfig,
    queue: Option<Arc<PriorityQueue>>,
    state: RwLock<ServiceState>,
    worker: Mutex<Option<Worker>>,
    failure: RwLock<Option<WorkerFailure>>,
    stop_requested: AtomicBool,
    stop_signal: Notify,
    exit_callback: Mutex<Option<ExitCallback>>,
}

/// Cheap `Clone` handle; clones share the queue, worker and state.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Service {
    pub fn new(name: impl Into<String>, mode: ServiceMode, config: ServiceConfig) -> Self {
        let queue = match mode {
            ServiceMode::Async => Some(Arc::new(PriorityQueue::new())),
            ServiceMode::Sync => None,
        };
        Self {
            inner: Arc::new(ServiceInner {
                name: name.into(),
                mode,
                config,
                queue,
                state: RwLock::new(ServiceState::Created),
                worker: Mutex::new(None),
                failure: RwLock::new(None),
                stop_requested: AtomicBool::new(false),
                stop_signal: Notify::new(),
                exit_callback: Mutex::new(None),
            }),
        }
    }

    pub fn with_exit_callback<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *lock(&self.inner.exit_callback) = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mode(&self) -> ServiceMode {
        self.inner.mode
    }

    pub fn is_async(&self) -> bool {
        self.inner.mode == ServiceMode::Async
    }

    pub fn state(&self) -> ServiceState {
        *self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Admits one event.
    ///
    /// Sync services execute it before returning; an event returning
    /// [`EventFlow::Stop`] stops the service. Async services only queue it.
    /// A service that is stopped, or has been asked to stop, rejects the event.
    pub async fn add_event(&self, event: Arc<dyn Event>) -> ServiceResult<()> {
        if self.state() == ServiceState::Stopped
            || self.inner.stop_requested.load(Ordering::SeqCst)
        {
            return Err(self.invalid_operation("add_event"));
        }
        match &self.inner.queue {
            Some(queue) => {
                let scheduled = queue.push(event);
                trace!("{}: queued {:?}", self.name(), scheduled);
                Ok(())
            }
            None => {
                trace!("{}: executing {} inline", self.name(), event.name());
                match event.execute(self).await? {
                    EventFlow::Continue => Ok(()),
                    EventFlow::Stop => {
                        self.finish();
                        Ok(())
                    }
                }
            }
        }
    }

    /// Spawns the worker of an async service.
    pub fn start(&self) -> ServiceResult<()> {
        let Some(queue) = self.inner.queue.clone() else {
            return Err(self.invalid_operation("start"));
        };
        let mut slot = lock(&self.inner.worker);
        if self.state() != ServiceState::Created {
            return Err(self.invalid_operation("start"));
        }
        // Running before the spawn: a worker that exits at once must still end Stopped.
        self.set_state(ServiceState::Running);
        let worker = Worker::spawn(
            format!("{}-{}", self.inner.config.name_prefix, self.name()),
            run(self.clone(), queue),
        )
        .inspect_err(|_| self.set_state(ServiceState::Created))?;
        *slot = Some(worker);
        info!("{}: started", self.name());
        Ok(())
    }

    /// Asks the service to stop.
    ///
    /// A running worker finishes the event it is executing and exits; queued events
    /// stay queued. A service that never ran stops immediately.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.stop_signal.notify_one();
        if self.state() == ServiceState::Created {
            self.finish();
        }
    }

    /// Waits for the worker to exit.
    ///
    /// Re-raises a failure of the worker as [`ServiceError::WorkerFailure`]. With a
    /// `timeout`, returns [`WorkerError::Timeout`] when it elapses; the service keeps
    /// running and can be joined again.
    pub async fn join(&self, timeout: Option<Duration>) -> ServiceResult<()> {
        if !self.is_async() {
            return Err(self.invalid_operation("join"));
        }
        let taken = lock(&self.inner.worker).take();
        let Some(mut worker) = taken else {
            return match self.last_failure() {
                Some(failure) => Err(ServiceError::WorkerFailure(failure)),
                None if self.state() == ServiceState::Stopped => Ok(()),
                None => Err(self.invalid_operation("join")),
            };
        };

        match worker.join(timeout).await {
            Ok(()) => Ok(()),
            Err(WorkerError::Timeout { worker: name, timeout }) => {
                *lock(&self.inner.worker) = Some(worker);
                Err(ServiceError::Worker(WorkerError::Timeout {
                    worker: name,
                    timeout,
                }))
            }
            Err(WorkerError::Failed(failure)) => {
                *self
                    .inner
                    .failure
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(failure.clone());
                Err(ServiceError::WorkerFailure(failure))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `true` while the worker of a started async service is running.
    pub fn is_alive(&self) -> bool {
        self.state() == ServiceState::Running
            && lock(&self.inner.worker)
                .as_ref()
                .is_some_and(|worker| !worker.is_finished())
    }

    pub fn has_pending_events(&self) -> bool {
        self.inner
            .queue
            .as_ref()
            .is_some_and(|queue| !queue.is_empty())
    }

    /// The worker's failure, available as soon as it happened.
    pub fn last_failure(&self) -> Option<WorkerFailure> {
        let recorded = self
            .inner
            .failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        recorded.or_else(|| {
            lock(&self.inner.worker)
                .as_ref()
                .and_then(|worker| worker.last_failure())
        })
    }

    /// Cancels every queued event matching `predicate`; see [`PriorityQueue::cancel`].
    pub fn cancel<P>(&self, predicate: P) -> ServiceResult<Vec<Arc<ScheduledEvent>>>
    where
        P: Fn(&ScheduledEvent) -> bool,
    {
        Ok(self.queue("cancel")?.cancel(predicate))
    }

    pub fn contains<P>(&self, predicate: P) -> ServiceResult<bool>
    where
        P: Fn(&ScheduledEvent) -> bool,
    {
        Ok(self.queue("contains")?.contains(predicate))
    }

    /// Queued events matching `predicate`, for inspection only.
    pub fn get<P>(&self, predicate: P) -> ServiceResult<Vec<Arc<ScheduledEvent>>>
    where
        P: Fn(&ScheduledEvent) -> bool,
    {
        Ok(self.queue("get")?.get(predicate))
    }

    fn queue(&self, operation: &str) -> ServiceResult<&PriorityQueue> {
        self.inner
            .queue
            .as_deref()
            .ok_or_else(|| self.invalid_operation(operation))
    }

    /// Moves to `Stopped` and runs the exit callback, once.
    fn finish(&self) {
        self.set_state(ServiceState::Stopped);
        let callback = lock(&self.inner.exit_callback).take();
        if let Some(callback) = callback {
            debug!("{}: running exit callback", self.name());
            callback();
        }
        info!("{}: stopped", self.name());
    }

    fn invalid_operation(&self, operation: &str) -> ServiceError {
        ServiceError::InvalidOperation {
            service: self.name().to_string(),
            mode: self.inner.mode,
            state: self.state(),
            operation: operation.to_string(),
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("state", &self.state())
            .finish()
    }
}

/// Marks the service stopped when the worker body ends, including by panic or abort.
struct FinishOnDrop(Service);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

async fn run(service: Service, queue: Arc<PriorityQueue>) -> Result<(), ExecutionError> {
    let service = FinishOnDrop(service);
    let service = &service.0;
    let idle_interval = service.inner.config.idle_interval;

    while !service.inner.stop_requested.load(Ordering::SeqCst) {
        match queue.pop() {
            Ok(scheduled) => {
                trace!("{}: executing {:?}", service.name(), scheduled);
                match scheduled.event().execute(service).await {
                    Ok(EventFlow::Continue) => {}
                    Ok(EventFlow::Stop) => {
                        debug!("{}: {} halted the worker", service.name(), scheduled.name());
                        return Ok(());
                    }
                    Err(e) => {
                        error!("{}: {} failed: {}", service.name(), scheduled.name(), e);
                        return Err(e);
                    }
                }
            }
            Err(QueueError::Empty) => {
                tokio::select! {
                    _ = queue.notified() => {}
                    _ = service.inner.stop_signal.notified() => {}
                    _ = tokio::time::sleep(idle_interval) => {}
                }
            }
        }
    }
    debug!("{}: stop requested", service.name());
    Ok(())
}

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use simlink::{
    config::{ServiceConfig, TransportConfig},
    event::{Event, EventFlow, ExecutionError, ExecutionResult, StopEvent},
    payload,
    port::{CommunicationPort, Replier},
    service::{Service, ServiceError, ServiceMode, ServiceState},
    timestamp::Timestamp,
    Payload,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

struct DummyEvent {
    at: Timestamp,
    executed: AtomicBool,
}

impl DummyEvent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            at: Timestamp::now(),
            executed: AtomicBool::new(false),
        })
    }

    fn executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Event for DummyEvent {
    fn timestamp(&self) -> Timestamp {
        self.at
    }

    fn name(&self) -> &str {
        "dummy"
    }

    async fn execute(&self, _service: &Service) -> ExecutionResult<EventFlow> {
        self.executed.store(true, Ordering::SeqCst);
        Ok(EventFlow::Continue)
    }
}

/// Records the order in which events run.
struct Tick {
    at: Timestamp,
    log: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl Event for Tick {
    fn timestamp(&self) -> Timestamp {
        self.at
    }

    async fn execute(&self, _service: &Service) -> ExecutionResult<EventFlow> {
        self.log.lock().unwrap().push(self.at.as_millis());
        Ok(EventFlow::Continue)
    }
}

/// Sends a request on a port when executed.
struct Request {
    port: CommunicationPort,
    body: Payload,
}

#[async_trait]
impl Event for Request {
    fn timestamp(&self) -> Timestamp {
        Timestamp::now()
    }

    async fn execute(&self, _service: &Service) -> ExecutionResult<EventFlow> {
        self.port.send(self.body.clone()).await?;
        Ok(EventFlow::Continue)
    }
}

struct Explode;

#[async_trait]
impl Event for Explode {
    fn timestamp(&self) -> Timestamp {
        Timestamp::now()
    }

    fn name(&self) -> &str {
        "explode"
    }

    async fn execute(&self, _service: &Service) -> ExecutionResult<EventFlow> {
        Err(ExecutionError::failed("explode", "transformer overloaded"))
    }
}

fn service(mode: ServiceMode) -> Service {
    Service::new(
        "dummy_service",
        mode,
        ServiceConfig {
            idle_interval: Duration::from_millis(5),
            ..ServiceConfig::default()
        },
    )
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_sync_add_and_process() {
    let service = service(ServiceMode::Sync);
    let event = DummyEvent::new();
    service.add_event(event.clone()).await.unwrap();
    assert!(event.executed());
}

#[tokio::test]
async fn test_async_add_and_process() {
    let service = service(ServiceMode::Async);
    let event = DummyEvent::new();
    service.add_event(event.clone()).await.unwrap();
    assert!(!event.executed());
    assert!(service.has_pending_events());

    service.start().unwrap();
    assert!(service.is_alive());
    assert!(eventually(|| event.executed()).await);

    service.add_event(Arc::new(StopEvent::now())).await.unwrap();
    service.join(Some(Duration::from_secs(5))).await.unwrap();
    assert!(!service.is_alive());
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn test_events_run_in_timestamp_order() {
    let service = service(ServiceMode::Async);
    let log = Arc::new(Mutex::new(Vec::new()));
    for millis in [30, 10, 20] {
        service
            .add_event(Arc::new(Tick {
                at: Timestamp::from_millis(millis).unwrap(),
                log: log.clone(),
            }))
            .await
            .unwrap();
    }
    service
        .add_event(Arc::new(StopEvent::new(Timestamp::from_millis(40).unwrap())))
        .await
        .unwrap();

    service.start().unwrap();
    service.join(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec![10, 20, 30]);
}

#[tokio::test]
async fn test_failure_reaches_join() {
    let exited = Arc::new(AtomicBool::new(false));
    let flag = exited.clone();
    let service =
        service(ServiceMode::Async).with_exit_callback(move || flag.store(true, Ordering::SeqCst));
    service.add_event(Arc::new(Explode)).await.unwrap();
    service.start().unwrap();

    match service.join(Some(Duration::from_secs(5))).await {
        Err(ServiceError::WorkerFailure(failure)) => {
            assert!(failure.message.contains("transformer overloaded"));
            assert!(!failure.panicked);
        }
        other => panic!("unexpected join result: {:?}", other),
    }
    assert!(exited.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_event_sends_message_from_worker() {
    let responder = CommunicationPort::network_receive(
        "tcp://localhost:0",
        &TransportConfig::default(),
    )
    .unwrap();
    responder.on_receive(|request, reply: Option<Replier>| {
        if let Some(reply) = reply {
            reply.reply(request);
        }
    });
    responder.listen().await.unwrap();

    let echoed = Arc::new(Mutex::new(None));
    let sink = echoed.clone();
    let port = CommunicationPort::network_send(&TransportConfig::default()).unwrap();
    port.on_receive(move |reply, _| *sink.lock().unwrap() = Some(reply));
    port.set_target(responder.local_address().unwrap())
        .await
        .unwrap();

    let service = service(ServiceMode::Async);
    service
        .add_event(Arc::new(Request {
            port,
            body: payload([("meter", 17i64)]),
        }))
        .await
        .unwrap();
    service.start().unwrap();

    assert!(eventually(|| echoed.lock().unwrap().is_some()).await);
    assert_eq!(
        echoed.lock().unwrap().clone(),
        Some(payload([("meter", 17i64)]))
    );
    service.stop();
    service.join(Some(Duration::from_secs(5))).await.unwrap();
}

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pretty_assertions::assert_eq;
use simlink::{
    config::{DiscoveryConfig, TransportConfig},
    discovery::{
        request, DiscoveryDelegate, DiscoveryError, DiscoveryFailure, DiscoveryServer,
        ServiceEntry, ServiceType, ERROR_KEY, SERVICE_ADDRESS_KEY, SERVICE_ID_KEY,
        SERVICE_REFERENCE_KEY, SERVICE_TYPE_KEY,
    },
    payload,
    port::{CommunicationPort, PortMode},
    Payload, Value,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn net_svc() -> ServiceType {
    ServiceType::Custom("NET_SVC".to_string())
}

struct Fixture {
    server: DiscoveryServer,
    allocator: CommunicationPort,
}

fn fixture() -> Fixture {
    let allocator = CommunicationPort::local_receive().with_name("allocator");
    allocator.on_receive(|request, reply| {
        if let Some(reply) = reply {
            let amount = request.get("amount").and_then(Value::as_i64).unwrap_or(0);
            reply.reply(payload([("allocated", amount)]));
        }
    });
    let entries = vec![
        ServiceEntry::local(ServiceType::Allocator, allocator.clone())
            .unwrap()
            .with_id("alloc-1"),
        ServiceEntry::remote(net_svc(), "tcp://localhost:8888").unwrap(),
    ];
    let server = DiscoveryServer::new(entries, CommunicationPort::local_receive());
    Fixture { server, allocator }
}

async fn ask(server_port: &CommunicationPort, request: Payload) -> Payload {
    let reply = Arc::new(Mutex::new(None));
    let sink = reply.clone();
    let client = CommunicationPort::local_send();
    client.on_receive(move |response, _| *sink.lock().unwrap() = Some(response));
    client.set_target(server_port).await.unwrap();
    client.send(request).await.unwrap();
    let response = reply.lock().unwrap().take();
    response.expect("discovery server did not reply")
}

#[tokio::test]
async fn test_resolves_local_reference() {
    let Fixture { server, allocator } = fixture();
    let reply = ask(server.port(), request(&ServiceType::Allocator)).await;
    assert_eq!(reply.get(SERVICE_TYPE_KEY), Some(&Value::from("ALLOCATOR")));
    assert_eq!(reply.get(SERVICE_REFERENCE_KEY), Some(&Value::Port(allocator)));
    assert_eq!(reply.get(SERVICE_ID_KEY), Some(&Value::from("alloc-1")));
    assert!(!reply.contains_key(SERVICE_ADDRESS_KEY));
}

#[tokio::test]
async fn test_resolves_transport_address() {
    let Fixture { server, .. } = fixture();
    let reply = ask(server.port(), request(&net_svc())).await;
    assert_eq!(
        reply.get(SERVICE_ADDRESS_KEY),
        Some(&Value::from("tcp://localhost:8888"))
    );
    assert!(!reply.contains_key(SERVICE_REFERENCE_KEY));
}

#[tokio::test]
async fn test_negative_replies_are_data() {
    let Fixture { server, .. } = fixture();

    let unknown = ask(server.port(), request(&ServiceType::Scheduler)).await;
    assert_eq!(unknown, DiscoveryFailure::ServiceUnknown.to_payload());
    assert_eq!(unknown.get(ERROR_KEY), Some(&Value::from("ServiceUnknown")));

    let missing = ask(server.port(), payload([("kind", "ALLOCATOR")])).await;
    assert_eq!(missing, DiscoveryFailure::MissingKey.to_payload());
}

#[tokio::test]
async fn test_delegate_connects_through_local_server() {
    let Fixture { server, .. } = fixture();
    let responses = Arc::new(Mutex::new(Vec::new()));
    let sink = responses.clone();

    let port = DiscoveryDelegate::default()
        .connect_to_service(
            &ServiceType::Allocator,
            move |response: Payload, _| sink.lock().unwrap().push(response),
            server.port(),
            &TransportConfig::default(),
        )
        .await
        .unwrap();
    assert_eq!(port.mode(), PortMode::LocalSend);
    assert!(port.is_ready());

    port.send(payload([("amount", 5i64)])).await.unwrap();
    assert_eq!(*responses.lock().unwrap(), vec![payload([("allocated", 5i64)])]);
}

#[tokio::test]
async fn test_delegate_over_network() {
    let transport = TransportConfig {
        request_timeout: Some(Duration::from_secs(5)),
        ..TransportConfig::default()
    };

    // The discovered service: a network-receive port with its own listener.
    let service = CommunicationPort::network_receive("tcp://localhost:0", &transport).unwrap();
    service.on_receive(|_, reply| {
        if let Some(reply) = reply {
            reply.reply(payload([("pong", true)]));
        }
    });
    service.listen().await.unwrap();
    let service_address = service.local_address().unwrap().to_string();

    // The discovery server, reachable over TCP as well.
    let server_port =
        CommunicationPort::network_receive("tcp://localhost:0", &transport).unwrap();
    let _server = DiscoveryServer::new(
        vec![ServiceEntry::remote(net_svc(), &service_address).unwrap()],
        server_port.clone(),
    );
    server_port.listen().await.unwrap();
    let server_address = server_port.local_address().unwrap();

    let delegate = DiscoveryDelegate::new(DiscoveryConfig {
        poll_interval: Duration::from_millis(5),
        reply_timeout: Some(Duration::from_secs(5)),
    });
    let pongs = Arc::new(Mutex::new(0));
    let counter = pongs.clone();
    let port = delegate
        .connect_to_service(
            &net_svc(),
            move |_, _| *counter.lock().unwrap() += 1,
            server_address,
            &transport,
        )
        .await
        .unwrap();
    assert_eq!(port.mode(), PortMode::NetworkSend);

    port.send(payload([("ping", true)])).await.unwrap();
    assert_eq!(*pongs.lock().unwrap(), 1);
    server_port
        .join_listener(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    service.join_listener(Some(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_delegate_reports_refusal() {
    let Fixture { server, .. } = fixture();
    let result = DiscoveryDelegate::default()
        .connect_to_service(
            &ServiceType::ElectricalNetwork,
            |_, _| {},
            server.port().clone(),
            &TransportConfig::default(),
        )
        .await;
    match result {
        Err(DiscoveryError::Refused {
            service_type,
            failure,
        }) => {
            assert_eq!(service_type, "ELECTRICAL_NETWORK");
            assert_eq!(failure, DiscoveryFailure::ServiceUnknown);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

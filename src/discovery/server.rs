use std::sync::Arc;

use tracing::{debug, warn};

use super::{DiscoveryFailure, ServiceEntry, ServiceType, SERVICE_TYPE_KEY};
use crate::{
    port::{CommunicationPort, Replier},
    value::Payload,
};

/// Answers "where is service type X" from a fixed, ordered registry.
///
/// The first entry of the requested type wins. Entries cannot be added or removed
/// after construction.
#[derive(Debug, Clone)]
pub struct DiscoveryServer {
    entries: Arc<Vec<ServiceEntry>>,
    port: CommunicationPort,
}

impl DiscoveryServer {
    /// Installs the server as `port`'s receive handler, replacing any previous one.
    pub fn new(entries: Vec<ServiceEntry>, port: CommunicationPort) -> Self {
        let entries = Arc::new(entries);
        let registry = entries.clone();
        port.on_receive(move |request: Payload, reply: Option<Replier>| {
            let response = resolve(&registry, &request);
            match reply {
                Some(reply) => reply.reply(response),
                None => warn!("Discovery request without a reply channel: {:?}", request),
            }
        });
        debug!(
            "Discovery server on {} with {} entries",
            port.name(),
            entries.len()
        );
        Self { entries, port }
    }

    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    pub fn port(&self) -> &CommunicationPort {
        &self.port
    }

    /// The reply this server sends for `request`.
    pub fn resolve(&self, request: &Payload) -> Payload {
        resolve(&self.entries, request)
    }
}

fn resolve(entries: &[ServiceEntry], request: &Payload) -> Payload {
    let Some(requested) = request
        .get(SERVICE_TYPE_KEY)
        .and_then(|value| value.as_str())
        .and_then(|name| name.parse::<ServiceType>().ok())
    else {
        debug!("Discovery request without service type: {:?}", request);
        return DiscoveryFailure::MissingKey.to_payload();
    };

    match entries
        .iter()
        .find(|entry| entry.service_type() == &requested)
    {
        Some(entry) => entry.to_payload(),
        None => {
            debug!("No service registered for {}", requested);
            DiscoveryFailure::ServiceUnknown.to_payload()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::{request, ERROR_KEY, SERVICE_REFERENCE_KEY},
        value::{payload, Value},
    };

    fn server() -> (DiscoveryServer, CommunicationPort, CommunicationPort) {
        let first = CommunicationPort::local_receive().with_name("first");
        let second = CommunicationPort::local_receive().with_name("second");
        let entries = vec![
            ServiceEntry::local(ServiceType::Allocator, first.clone()).unwrap(),
            ServiceEntry::local(ServiceType::Allocator, second).unwrap(),
            ServiceEntry::remote(
                ServiceType::Custom("NET_SVC".to_string()),
                "tcp://localhost:8888",
            )
            .unwrap(),
        ];
        let port = CommunicationPort::local_receive();
        (DiscoveryServer::new(entries, port.clone()), port, first)
    }

    #[test]
    fn test_first_matching_entry_wins() {
        let (server, _, first) = server();
        let reply = server.resolve(&request(&ServiceType::Allocator));
        assert_eq!(reply.get(SERVICE_REFERENCE_KEY), Some(&Value::Port(first)));
    }

    #[test]
    fn test_custom_entry_named_like_builtin_type_matches() {
        let port = CommunicationPort::local_receive().with_name("allocator");
        let server = DiscoveryServer::new(
            vec![
                ServiceEntry::local(ServiceType::Custom("ALLOCATOR".to_string()), port.clone())
                    .unwrap(),
            ],
            CommunicationPort::local_receive(),
        );
        let reply = server.resolve(&request(&ServiceType::Allocator));
        assert_eq!(reply.get(SERVICE_REFERENCE_KEY), Some(&Value::Port(port)));
    }

    #[test]
    fn test_negative_replies() {
        let (server, _, _) = server();
        assert_eq!(
            server.resolve(&request(&ServiceType::Scheduler)).get(ERROR_KEY),
            Some(&Value::from("ServiceUnknown"))
        );
        assert_eq!(
            server.resolve(&payload([("other", 1i64)])).get(ERROR_KEY),
            Some(&Value::from("MissingKey"))
        );
        assert_eq!(
            server
                .resolve(&payload([(SERVICE_TYPE_KEY, 3i64)]))
                .get(ERROR_KEY),
            Some(&Value::from("MissingKey"))
        );
    }

    #[test]
    fn test_server_installs_handler() {
        let (server, port, _) = server();
        assert!(port.has_handler());
        assert_eq!(server.port(), &port);
        assert_eq!(server.entries().len(), 3);
    }
}

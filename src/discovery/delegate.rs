use std::sync::{Arc, Mutex, PoisonError};

use tokio::{sync::Notify, time::Instant};
use tracing::{debug, error, instrument};

use super::{request, DiscoveryError, DiscoveryResult, ServiceLocator, ServiceType};
use crate::{
    config::{DiscoveryConfig, TransportConfig},
    port::{CommunicationPort, Replier, TransportAddress},
    value::Payload,
};

/// How to reach the discovery server.
#[derive(Debug, Clone)]
pub enum DiscoveryTarget {
    /// The server's local-receive port.
    Local(CommunicationPort),
    /// Address of the server's network-receive port.
    Remote(String),
}

impl From<CommunicationPort> for DiscoveryTarget {
    fn from(port: CommunicationPort) -> Self {
        DiscoveryTarget::Local(port)
    }
}

impl From<&CommunicationPort> for DiscoveryTarget {
    fn from(port: &CommunicationPort) -> Self {
        DiscoveryTarget::Local(port.clone())
    }
}

impl From<&str> for DiscoveryTarget {
    fn from(address: &str) -> Self {
        DiscoveryTarget::Remote(address.to_string())
    }
}

impl From<String> for DiscoveryTarget {
    fn from(address: String) -> Self {
        DiscoveryTarget::Remote(address)
    }
}

impl From<TransportAddress> for DiscoveryTarget {
    fn from(address: TransportAddress) -> Self {
        DiscoveryTarget::Remote(address.to_string())
    }
}

/// Client side of discovery.
///
/// Does not spawn anything; each call drives its own round trip on a fresh port.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryDelegate {
    config: DiscoveryConfig,
}

#[derive(Default)]
struct ReplySlot {
    reply: Mutex<Option<Payload>>,
    arrived: Notify,
}

impl ReplySlot {
    fn put(&self, reply: Payload) {
        *self.reply.lock().unwrap_or_else(PoisonError::into_inner) = Some(reply);
        self.arrived.notify_one();
    }

    fn take(&self) -> Option<Payload> {
        self.reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl DiscoveryDelegate {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Asks the discovery server for `service_type` and returns a send port to it.
    ///
    /// The returned port is ready and has `handler` as its receive callback. A
    /// negative answer is logged and returned as [`DiscoveryError::Refused`].
    #[instrument(level = "debug", skip(self, handler, target, transport))]
    pub async fn connect_to_service<H>(
        &self,
        service_type: &ServiceType,
        handler: H,
        target: impl Into<DiscoveryTarget>,
        transport: &TransportConfig,
    ) -> DiscoveryResult<CommunicationPort>
    where
        H: Fn(Payload, Option<Replier>) + Send + Sync + 'static,
    {
        let reply = self.discover(service_type, target.into(), transport).await?;
        let locator = ServiceLocator::from_reply(service_type, &reply).map_err(|e| {
            error!(
                "Discovery server answered {:?} to a request for {}",
                reply, service_type
            );
            e
        })?;

        let port = match locator {
            ServiceLocator::Local(peer) => {
                let port = CommunicationPort::local_send();
                port.set_target(peer).await?;
                port
            }
            ServiceLocator::Remote(address) => {
                let port = CommunicationPort::network_send(transport)?;
                port.set_target(address).await?;
                port
            }
        };
        port.set_name(format!("{}-client", service_type).to_lowercase());
        port.on_receive(handler);
        debug!("Connected to {} through {:?}", service_type, port);
        Ok(port)
    }

    async fn discover(
        &self,
        service_type: &ServiceType,
        target: DiscoveryTarget,
        transport: &TransportConfig,
    ) -> DiscoveryResult<Payload> {
        let slot = Arc::new(ReplySlot::default());
        let port = match &target {
            DiscoveryTarget::Local(_) => CommunicationPort::local_send(),
            DiscoveryTarget::Remote(_) => CommunicationPort::network_send(transport)?,
        }
        .with_name("discovery-delegate");
        let sink = slot.clone();
        port.on_receive(move |reply, _| sink.put(reply));

        match target {
            DiscoveryTarget::Local(server) => port.set_target(server).await?,
            DiscoveryTarget::Remote(address) => port.set_target(address).await?,
        }
        port.send(request(service_type)).await?;

        let deadline = self
            .config
            .reply_timeout
            .map(|limit| (Instant::now() + limit, limit));
        loop {
            if let Some(reply) = slot.take() {
                return Ok(reply);
            }
            if let Some((deadline, limit)) = deadline {
                if Instant::now() >= deadline {
                    return Err(DiscoveryError::Timeout {
                        service_type: service_type.to_string(),
                        timeout: limit,
                    });
                }
            }
            tokio::select! {
                _ = slot.arrived.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::{DiscoveryFailure, DiscoveryServer, ServiceEntry},
        value::payload,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_discovery_returns_ready_port() {
        let allocator = CommunicationPort::local_receive().with_name("allocator");
        allocator.on_receive(|_, reply| {
            if let Some(reply) = reply {
                reply.reply(payload([("granted", true)]));
            }
        });
        let server_port = CommunicationPort::local_receive();
        let _server = DiscoveryServer::new(
            vec![ServiceEntry::local(ServiceType::Allocator, allocator.clone()).unwrap()],
            server_port.clone(),
        );

        let granted = Arc::new(Mutex::new(false));
        let flag = granted.clone();
        let port = DiscoveryDelegate::default()
            .connect_to_service(
                &ServiceType::Allocator,
                move |reply: Payload, _| {
                    *flag.lock().unwrap() = reply.contains_key("granted");
                },
                &server_port,
                &TransportConfig::default(),
            )
            .await
            .unwrap();

        assert!(port.is_ready());
        port.send(payload([("ask", 1i64)])).await.unwrap();
        assert!(*granted.lock().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_service_is_refused() {
        let server_port = CommunicationPort::local_receive();
        let _server = DiscoveryServer::new(vec![], server_port.clone());
        let result = DiscoveryDelegate::default()
            .connect_to_service(
                &ServiceType::Scheduler,
                |_, _| {},
                server_port,
                &TransportConfig::default(),
            )
            .await;
        assert!(matches!(
            result,
            Err(DiscoveryError::Refused {
                failure: DiscoveryFailure::ServiceUnknown,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let server_port = CommunicationPort::local_receive();
        server_port.on_receive(|_, _reply| {});
        let delegate = DiscoveryDelegate::new(DiscoveryConfig {
            poll_interval: Duration::from_millis(5),
            reply_timeout: Some(Duration::from_millis(50)),
        });
        let result = delegate
            .connect_to_service(
                &ServiceType::Client,
                |_, _| {},
                server_port,
                &TransportConfig::default(),
            )
            .await;
        assert!(matches!(result, Err(DiscoveryError::Timeout { .. })));
    }
}

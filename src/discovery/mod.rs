//! # Service Discovery
//!
//! Lets a service find another service's port by its logical [`ServiceType`].
//!
//! A [`DiscoveryServer`] sits behind a well-known port and answers
//! `{"service_type": <type>}` requests from a fixed registry. A
//! [`DiscoveryDelegate`] performs that round trip on the client side and hands back a
//! send port already pointed at the resolved service.
//!
//! Negative answers are data, not errors: the server replies `{"error": "MissingKey"}`
//! or `{"error": "ServiceUnknown"}` through the normal reply channel.

mod delegate;
mod server;

pub use delegate::{DiscoveryDelegate, DiscoveryTarget};
pub use server::DiscoveryServer;

use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    port::{CommunicationPort, PortError, TransportAddress},
    value::{Payload, Value},
};

pub const SERVICE_TYPE_KEY: &str = "service_type";
pub const SERVICE_REFERENCE_KEY: &str = "service_reference";
pub const SERVICE_ADDRESS_KEY: &str = "service_tcp_port";
pub const SERVICE_ID_KEY: &str = "service_id";
pub const ERROR_KEY: &str = "error";

/// Role a service plays in the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Client,
    Allocator,
    Scheduler,
    ElectricalNetwork,
    Custom(String),
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Client => write!(f, "CLIENT"),
            ServiceType::Allocator => write!(f, "ALLOCATOR"),
            ServiceType::Scheduler => write!(f, "SCHEDULER"),
            ServiceType::ElectricalNetwork => write!(f, "ELECTRICAL_NETWORK"),
            ServiceType::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for ServiceType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(DiscoveryError::InvalidEntry {
                reason: "service type must not be empty".to_string(),
            }),
            "CLIENT" => Ok(ServiceType::Client),
            "ALLOCATOR" => Ok(ServiceType::Allocator),
            "SCHEDULER" => Ok(ServiceType::Scheduler),
            "ELECTRICAL_NETWORK" => Ok(ServiceType::ElectricalNetwork),
            custom => Ok(ServiceType::Custom(custom.to_string())),
        }
    }
}

impl From<&ServiceType> for Value {
    fn from(service_type: &ServiceType) -> Self {
        Value::String(service_type.to_string())
    }
}

/// Negative discovery answer, carried in the `"error"` field of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum DiscoveryFailure {
    /// The request had no usable `service_type`.
    MissingKey,
    /// No registry entry matches the requested type.
    ServiceUnknown,
}

impl DiscoveryFailure {
    pub fn to_payload(self) -> Payload {
        let mut reply = Payload::new();
        reply.insert(ERROR_KEY.to_string(), Value::String(self.to_string()));
        reply
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery of '{service_type}' refused: {failure}")]
    Refused {
        service_type: String,
        failure: DiscoveryFailure,
    },

    #[error("Discovery reply makes no sense: {reply}")]
    MalformedReply { reply: String },

    #[error("Invalid service entry: {reason}")]
    InvalidEntry { reason: String },

    #[error("Discovery of '{service_type}' timed out after {timeout:?}")]
    Timeout {
        service_type: String,
        timeout: Duration,
    },

    #[error("Port error: {0}")]
    Port(#[from] PortError),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Where a registered service can be reached.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceLocator {
    Local(CommunicationPort),
    Remote(TransportAddress),
}

impl ServiceLocator {
    /// Reads the locator out of a discovery reply.
    pub fn from_reply(service_type: &ServiceType, reply: &Payload) -> DiscoveryResult<Self> {
        let malformed = || DiscoveryError::MalformedReply {
            reply: format!("{:?}", reply),
        };

        if let Some(value) = reply.get(SERVICE_REFERENCE_KEY) {
            let port = value.as_port().ok_or_else(malformed)?;
            return Ok(ServiceLocator::Local(port.clone()));
        }
        if let Some(value) = reply.get(SERVICE_ADDRESS_KEY) {
            let address = value.as_str().ok_or_else(malformed)?;
            return Ok(ServiceLocator::Remote(TransportAddress::parse(address)?));
        }
        if let Some(value) = reply.get(ERROR_KEY) {
            let failure = value
                .as_str()
                .and_then(|s| s.parse::<DiscoveryFailure>().ok())
                .ok_or_else(malformed)?;
            return Err(DiscoveryError::Refused {
                service_type: service_type.to_string(),
                failure,
            });
        }
        Err(malformed())
    }
}

/// One registry record: a service type and exactly one locator.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntry {
    service_type: ServiceType,
    locator: ServiceLocator,
    service_id: Option<Value>,
}

impl ServiceEntry {
    pub fn local(service_type: ServiceType, port: CommunicationPort) -> DiscoveryResult<Self> {
        Self::new(service_type, ServiceLocator::Local(port))
    }

    pub fn remote(service_type: ServiceType, address: &str) -> DiscoveryResult<Self> {
        let address = TransportAddress::parse(address)?;
        Self::new(service_type, ServiceLocator::Remote(address))
    }

    /// Custom names that spell a built-in type are stored as that type, so they match
    /// the requests `resolve` parses.
    fn new(service_type: ServiceType, locator: ServiceLocator) -> DiscoveryResult<Self> {
        let service_type = match service_type {
            ServiceType::Custom(name) => name.parse()?,
            known => known,
        };
        Ok(Self {
            service_type,
            locator,
            service_id: None,
        })
    }

    pub fn with_id(mut self, service_id: impl Into<Value>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn locator(&self) -> &ServiceLocator {
        &self.locator
    }

    pub fn service_id(&self) -> Option<&Value> {
        self.service_id.as_ref()
    }

    /// The entry as sent in a successful discovery reply.
    pub fn to_payload(&self) -> Payload {
        let mut reply = Payload::new();
        reply.insert(SERVICE_TYPE_KEY.to_string(), (&self.service_type).into());
        match &self.locator {
            ServiceLocator::Local(port) => {
                reply.insert(SERVICE_REFERENCE_KEY.to_string(), Value::Port(port.clone()));
            }
            ServiceLocator::Remote(address) => {
                reply.insert(
                    SERVICE_ADDRESS_KEY.to_string(),
                    Value::String(address.to_string()),
                );
            }
        }
        if let Some(id) = &self.service_id {
            reply.insert(SERVICE_ID_KEY.to_string(), id.clone());
        }
        reply
    }
}

/// Builds a `{"service_type": <type>}` request.
pub fn request(service_type: &ServiceType) -> Payload {
    let mut request = Payload::new();
    request.insert(SERVICE_TYPE_KEY.to_string(), service_type.into());
    request
}

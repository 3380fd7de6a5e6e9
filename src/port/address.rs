use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
};

use lazy_static::lazy_static;
use regex::Regex;

use super::PortError;

lazy_static! {
    static ref ADDRESS_PATTERN: Regex =
        Regex::new(r"^([a-z][a-z0-9+.-]*)://([^:/\s]+):([0-9]{1,5})$").unwrap();
}

/// A parsed `scheme://host:port` transport address.
///
/// `host` is either the literal `localhost` or a dotted IPv4 quad whose octets are
/// all within 0-255. Port `0` is accepted so a listener can ask for an ephemeral port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    scheme: String,
    host: String,
    ip: Ipv4Addr,
    port: u16,
}

impl TransportAddress {
    pub fn parse(address: &str) -> Result<Self, PortError> {
        let invalid = |reason: &str| PortError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let captures = ADDRESS_PATTERN
            .captures(address)
            .ok_or_else(|| invalid("expected scheme://host:port"))?;
        let scheme = &captures[1];
        let host = &captures[2];
        let port = captures[3]
            .parse::<u16>()
            .map_err(|_| invalid("port must be within 0-65535"))?;

        let ip = parse_host(host).ok_or_else(|| {
            invalid("host must be localhost or four dot-separated octets 0-255")
        })?;

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            ip,
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The IPv4 socket address. `localhost` maps to the loopback.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Same scheme, but pointing at the concrete address a listener was bound to.
    pub fn with_socket_addr(&self, addr: SocketAddrV4) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: addr.ip().to_string(),
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

/// Octets are read as decimal numbers, so `010` is 10.
fn parse_host(host: &str) -> Option<Ipv4Addr> {
    if host == "localhost" {
        return Some(Ipv4Addr::LOCALHOST);
    }
    let mut octets = [0u8; 4];
    let mut parts = host.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

impl FromStr for TransportAddress {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_localhost() {
        let address = TransportAddress::parse("tcp://localhost:5668").unwrap();
        assert_eq!(address.scheme(), "tcp");
        assert_eq!(address.host(), "localhost");
        assert_eq!(address.port(), 5668);
        assert_eq!(address.socket_addr().to_string(), "127.0.0.1:5668");
        assert_eq!(address.to_string(), "tcp://localhost:5668");
    }

    #[test]
    fn test_parse_ipv4() {
        let address: TransportAddress = "tcp://10.0.255.1:80".parse().unwrap();
        assert_eq!(address.socket_addr().to_string(), "10.0.255.1:80");
    }

    #[test]
    fn test_leading_zero_octets_are_decimal() {
        let address = TransportAddress::parse("tcp://010.0.0.1:80").unwrap();
        assert_eq!(address.host(), "010.0.0.1");
        assert_eq!(address.socket_addr().to_string(), "10.0.0.1:80");

        let address = TransportAddress::parse("tcp://192.168.001.020:5668").unwrap();
        assert_eq!(address.socket_addr().to_string(), "192.168.1.20:5668");
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        for bad in [
            "localhost:5555",
            "tcp://localhost",
            "tcp://256.0.0.1:80",
            "tcp://1.2.3:80",
            "tcp://1.2.3.4.5:80",
            "tcp://1..2.3:80",
            "tcp://0256.0.0.1:80",
            "tcp://example.com:80",
            "tcp://-1.2.3.4:80",
            "tcp://localhost:70000",
            "tcp://localhost:port",
            "",
        ] {
            let result = TransportAddress::parse(bad);
            assert!(
                matches!(result, Err(PortError::InvalidAddress { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_with_socket_addr() {
        let address = TransportAddress::parse("tcp://localhost:0").unwrap();
        let bound = address.with_socket_addr("127.0.0.1:40000".parse().unwrap());
        assert_eq!(bound.socket_addr().to_string(), "127.0.0.1:40000");
        assert_eq!(bound.to_string(), "tcp://127.0.0.1:40000");
    }
}

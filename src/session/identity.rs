use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// The source host of an inbound connection, port stripped.
///
/// Two connections from the same host share an identity no matter which
/// ephemeral port they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity(IpAddr);

impl ClientIdentity {
    pub fn new(ip: IpAddr) -> Self {
        // ::ffff:a.b.c.d and a.b.c.d are the same host
        Self(ip.to_canonical())
    }
}

impl From<SocketAddr> for ClientIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip())
    }
}

impl From<IpAddr> for ClientIdentity {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip)
    }
}

/// Parses `host:port` (`[v6]:port` for IPv6) or a bare address.
impl FromStr for ClientIdentity {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<SocketAddr>() {
            Ok(addr) => Ok(addr.into()),
            Err(_) => s.parse::<IpAddr>().map(Self::new),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
};

/// Address and port of one network peer.
///
/// Two endpoints are equal when their numeric addresses and ports are equal.
/// IPv4 addresses compare in their IPv4-mapped IPv6 form, so `127.0.0.1`,
/// `::ffff:127.0.0.1` and `2130706433` all name the same peer.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: IpAddr, port: u16) -> Endpoint {
        Endpoint { address, port }
    }

    /// Accepts dotted IPv4, IPv6, a plain 32-bit integer, or `localhost`.
    pub fn parse(address: &str, port: u16) -> Option<Endpoint> {
        let address = address.trim();
        let ip = if address.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else if let Ok(ip) = IpAddr::from_str(address) {
            ip
        } else {
            IpAddr::V4(Ipv4Addr::from(address.parse::<u32>().ok()?))
        };
        Some(Endpoint::new(ip, port))
    }

    pub fn address_key(&self) -> u128 {
        match self.address {
            IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    /// A wildcard address (`0.0.0.0`, `::`) is only valid for binding. Peers
    /// dialing it are answered from loopback, so that is what it names here.
    pub fn dialable(self) -> Endpoint {
        let address = match self.address {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            address => address,
        };
        Endpoint::new(address, self.port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.address_key() == other.address_key()
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address_key().hash(state);
        self.port.hash(state);
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

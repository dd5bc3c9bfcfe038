//! Ambient request information consumed by the throttler.

use std::net::{IpAddr, SocketAddr};

/// Supplies the source address of the request currently being handled.
pub trait RequestContext: Send + Sync {
    /// Source IP of the current request, if one is known.
    fn client_ip(&self) -> Option<IpAddr>;
}

/// Context for work that is not tied to an inbound request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRequestContext;

impl RequestContext for NoRequestContext {
    fn client_ip(&self) -> Option<IpAddr> {
        None
    }
}

/// Context of a request received from a known peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

impl From<SocketAddr> for ClientAddr {
    fn from(addr: SocketAddr) -> Self {
        ClientAddr(addr.ip())
    }
}

impl From<IpAddr> for ClientAddr {
    fn from(ip: IpAddr) -> Self {
        ClientAddr(ip)
    }
}

impl RequestContext for ClientAddr {
    fn client_ip(&self) -> Option<IpAddr> {
        Some(self.0)
    }
}

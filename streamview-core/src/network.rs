//! Address helpers: local address detection and stream locators.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Detect the address this host uses for outbound traffic.
///
/// "Connecting" a UDP socket sends nothing; it only makes the OS pick a
/// route, whose local address is what streaming software on the LAN
/// should target. Falls back to loopback when there is no route.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

/// Host, port and path of an RTMP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    host: String,
    port: u16,
    path: String,
}

impl StreamEndpoint {
    /// `path` gains a leading `/` if it lacks one.
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            host: host.into(),
            port,
            path,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `rtmp://<host>:<port><path>`
    pub fn locator(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rtmp://{}:{}{}", self.host, self.port, self.path)
    }
}

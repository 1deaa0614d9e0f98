use std::{
    io,
    net::{IpAddr, SocketAddr, TcpStream},
    time::Duration,
};

use log::{info, warn};

use super::{config::TransportConfig, endpoint::EndpointDescriptor, error::TransportError};

/// Outbound connection parameters: candidate addresses, port and timeout.
///
/// Candidates are tried in configuration order; the first address that
/// accepts within the connect timeout wins. Used by [`Connection`] and
/// [`RequestChannel`] for their active opens.
///
/// [`Connection`]: super::connection::Connection
/// [`RequestChannel`]: super::request::RequestChannel
#[derive(Debug, Clone)]
pub struct Connector {
    addresses: Vec<IpAddr>,
    port: u16,
    connect_timeout: Duration,
}

impl Connector {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            addresses: Vec::new(),
            port: 0,
            connect_timeout: config.connect_timeout,
        }
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.addresses.push(address);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Adopt the candidate set and port published by a server's endpoint
    /// descriptor.
    pub fn configure_from(mut self, endpoint: &EndpointDescriptor) -> Self {
        self.addresses = endpoint.addresses.clone();
        self.port = endpoint.port;
        self
    }

    /// Try each candidate in order; fail naming every attempted address.
    pub fn connect(&self) -> Result<TcpStream, TransportError> {
        if self.addresses.is_empty() || self.port == 0 {
            return Err(TransportError::NotConfigured);
        }

        let mut attempted = Vec::new();
        let mut last: Option<io::Error> = None;
        for address in &self.addresses {
            let target = SocketAddr::new(*address, self.port);
            attempted.push(target);
            match TcpStream::connect_timeout(&target, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!("connected to {target}");
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("connect to {target} failed: {e}");
                    last = Some(e);
                }
            }
        }

        Err(TransportError::NoCandidateReachable {
            attempted,
            last: last.unwrap_or_else(|| io::Error::other("no candidates attempted")),
        })
    }
}

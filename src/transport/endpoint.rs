use std::net::IpAddr;

use log::debug;

use super::error::TransportError;
use crate::message::{StructuredMessage, Value};

/// Reserved field names of an endpoint descriptor message.
pub const FIELD_TYPE: &str = "type";
pub const FIELD_ADDRESS: &str = "address";
pub const FIELD_PORT: &str = "port";

/// Descriptor `type` value for socket endpoints.
pub const SOCKET_ENDPOINT_TYPE: &str = "Socket";

/// Describes how to reach a listening server: candidate addresses + port.
///
/// Travels as a structured message with reserved fields `type` (constant
/// `"Socket"`), repeatable `address` and `port`. Consumers re-derive
/// connection parameters from it once; it carries no identity of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

impl EndpointDescriptor {
    pub fn new(addresses: Vec<IpAddr>, port: u16) -> Self {
        Self { addresses, port }
    }

    pub fn to_message(&self) -> StructuredMessage {
        let mut builder = StructuredMessage::builder().push_named(FIELD_TYPE, SOCKET_ENDPOINT_TYPE);
        for address in &self.addresses {
            builder = builder.push_named(FIELD_ADDRESS, address.to_string());
        }
        builder.push_named(FIELD_PORT, self.port as i32).build()
    }

    pub fn from_message(message: &StructuredMessage) -> Result<Self, TransportError> {
        match message.by_name(FIELD_TYPE).map(|f| &f.value) {
            Some(Value::Str(t)) if t == SOCKET_ENDPOINT_TYPE => {}
            Some(other) => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "type is {other:?}, expected \"{SOCKET_ENDPOINT_TYPE}\""
                )));
            }
            None => {
                return Err(TransportError::InvalidEndpoint(
                    "missing type field".to_string(),
                ));
            }
        }

        let mut addresses = Vec::new();
        for field in message.all_by_name(FIELD_ADDRESS) {
            let text = field.value.as_str().ok_or_else(|| {
                TransportError::InvalidEndpoint("address field is not a string".to_string())
            })?;
            let address = text.parse::<IpAddr>().map_err(|e| {
                TransportError::InvalidEndpoint(format!("unparseable address {text:?}: {e}"))
            })?;
            addresses.push(address);
        }
        if addresses.is_empty() {
            return Err(TransportError::InvalidEndpoint(
                "no address fields".to_string(),
            ));
        }

        let port = match message.by_name(FIELD_PORT).map(|f| &f.value) {
            Some(Value::I32(p)) if (1..=i32::from(u16::MAX)).contains(p) => *p as u16,
            Some(other) => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unusable port field {other:?}"
                )));
            }
            None => {
                return Err(TransportError::InvalidEndpoint(
                    "missing port field".to_string(),
                ));
            }
        };

        Ok(Self { addresses, port })
    }
}

/// Addresses of the local non-loopback interfaces, for descriptors built
/// from a wildcard bind.
pub(crate) fn local_interface_addresses() -> Vec<IpAddr> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|i| !i.is_loopback())
            .map(|i| i.ip())
            .collect(),
        Err(e) => {
            debug!("interface enumeration failed: {e}");
            Vec::new()
        }
    }
}

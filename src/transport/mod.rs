//! Socket-based message transport.
//!
//! This module moves [`StructuredMessage`]s between two processes over TCP.
//! It provides fire-and-forget publishing, duplex connections with
//! asynchronous inbound dispatch, and synchronous request/response exchange,
//! together with the lifecycle plumbing both ends need: candidate-address
//! connection establishment, a listening accept loop, and cooperative
//! shutdown that unblocks threads stuck in blocking I/O.
//!
//! # Overview
//!
//! A [`ServerSocketProcess`] accepts raw sockets and hands each one to a
//! [`SocketHandler`], which typically wraps it in a passive [`Connection`].
//! Inbound bytes become messages dispatched to a receiver callback; outbound
//! messages pass through a [`BatchingWriter`] that serializes concurrent
//! senders into ordered, optionally coalesced flushes. A
//! [`RequestChannel`] layers single-flight request/reply on the same wire.
//!
//! # Concurrency
//!
//! The scheduling model is thread-per-connection: one dedicated
//! [`TerminatableWorker`] blocks in a read loop per live connection, plus
//! one accept thread per listening server. There is no shared event loop.
//! Many application threads may call `send` concurrently without external
//! locking. Every blocking loop pairs with an explicit termination signal
//! that also force-closes its socket, so a blocked thread wakes with an I/O
//! error instead of hanging.
//!
//! # Discovery
//!
//! A started server exposes an [`EndpointDescriptor`], a structured message
//! with reserved `type`/`address`/`port` fields, which a client feeds into
//! a [`Connector`] to derive its candidate address set.
//!
//! # See Also
//!
//! - [`message`](crate::message): The payload unit carried by this layer.
//! - [`codec`](crate::codec): Framing of one message at a time on the wire.
//!
//! [`StructuredMessage`]: crate::message::StructuredMessage
mod config;
mod connection;
mod connector;
mod endpoint;
mod error;
mod pool;
mod request;
mod server;
mod worker;
mod writer;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionStateListener, MessageReceiver};
pub use connector::Connector;
pub use endpoint::{
    EndpointDescriptor, FIELD_ADDRESS, FIELD_PORT, FIELD_TYPE, SOCKET_ENDPOINT_TYPE,
};
pub use error::TransportError;
pub use pool::DispatchPool;
pub use request::RequestChannel;
pub use server::{ServerSocketProcess, SocketHandler};
pub use worker::TerminatableWorker;
pub use writer::BatchingWriter;

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr, TcpStream},
        sync::{Arc, Mutex, mpsc},
        time::Duration,
    };

    use super::*;
    use crate::message::StructuredMessage;

    /// Full discovery scenario: the server publishes an endpoint descriptor,
    /// the client configures itself from it, sends one message, and sees a
    /// single failure notification when the server goes away.
    #[test]
    fn endpoint_discovery_scenario() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let connections: Arc<Mutex<Vec<Arc<Connection>>>> = Arc::new(Mutex::new(Vec::new()));
        let handler_connections = Arc::clone(&connections);

        let server = ServerSocketProcess::new(
            0,
            move |stream: TcpStream| {
                let connection =
                    Arc::new(Connection::from_stream(stream, TransportConfig::default()));
                let seen_tx = seen_tx.clone();
                connection.set_receiver(move |message: StructuredMessage| {
                    seen_tx.send(message).unwrap();
                });
                connection.start().unwrap();
                handler_connections.lock().unwrap().push(connection);
            },
            TransportConfig::default(),
        )
        .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        server.start().unwrap();

        let descriptor_message = server.endpoint().unwrap().to_message();
        assert_ne!(server.local_port().unwrap(), 0);

        let endpoint = EndpointDescriptor::from_message(&descriptor_message).unwrap();
        let connector = Connector::new(&TransportConfig::default()).configure_from(&endpoint);
        let client = Connection::new(connector, TransportConfig::default());

        let (fail_tx, fail_rx) = mpsc::channel();
        client.set_state_listener(move |_error: &TransportError| {
            fail_tx.send(()).unwrap();
        });
        client.start().unwrap();

        client
            .send(StructuredMessage::builder().push_named("ping", 1i32).build())
            .unwrap();

        let seen = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen.len(), 1);
        let field = seen.field_at(0).unwrap();
        assert_eq!(field.name.as_deref(), Some("ping"));
        assert_eq!(field.value.as_i32(), Some(1));

        for connection in connections.lock().unwrap().drain(..) {
            connection.stop();
        }
        server.stop();

        // Exactly one closed/failed notification: not zero, not more.
        assert!(fail_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(fail_rx.recv_timeout(Duration::from_millis(300)).is_err());

        client.stop();
    }

    /// Closing one connection leaves other concurrent connections intact.
    #[test]
    fn connections_are_independent() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let connections: Arc<Mutex<Vec<Arc<Connection>>>> = Arc::new(Mutex::new(Vec::new()));
        let handler_connections = Arc::clone(&connections);

        let server = ServerSocketProcess::new(
            0,
            move |stream: TcpStream| {
                let connection =
                    Arc::new(Connection::from_stream(stream, TransportConfig::default()));
                let seen_tx = seen_tx.clone();
                connection.set_receiver(move |message: StructuredMessage| {
                    seen_tx.send(message).unwrap();
                });
                connection.start().unwrap();
                handler_connections.lock().unwrap().push(connection);
            },
            TransportConfig::default(),
        )
        .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        server.start().unwrap();
        let port = server.local_port().unwrap();

        let client_for = |tag: i32| {
            let connector = Connector::new(&TransportConfig::default())
                .address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .port(port);
            let client = Connection::new(connector, TransportConfig::default());
            client.start().unwrap();
            client
                .send(StructuredMessage::builder().push_named("tag", tag).build())
                .unwrap();
            client
        };

        let first = client_for(1);
        let second = client_for(2);

        let mut tags = vec![
            seen_rx
                .recv_timeout(Duration::from_secs(2))
                .unwrap()
                .by_name("tag")
                .unwrap()
                .value
                .as_i32()
                .unwrap(),
            seen_rx
                .recv_timeout(Duration::from_secs(2))
                .unwrap()
                .by_name("tag")
                .unwrap()
                .value
                .as_i32()
                .unwrap(),
        ];
        tags.sort();
        assert_eq!(tags, vec![1, 2]);

        // Dropping the first client must not disturb the second stream.
        first.stop();
        second
            .send(StructuredMessage::builder().push_named("tag", 3i32).build())
            .unwrap();
        let third = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(third.by_name("tag").unwrap().value.as_i32(), Some(3));

        second.stop();
        for connection in connections.lock().unwrap().drain(..) {
            connection.stop();
        }
        server.stop();
    }
}

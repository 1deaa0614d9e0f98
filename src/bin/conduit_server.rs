use std::{
    error::Error,
    net::{SocketAddr, TcpStream},
    sync::{Arc, Mutex, mpsc},
};

use clap::Parser;
use conduit::{
    StructuredMessage,
    transport::{Connection, ServerSocketProcess, TransportConfig},
};
use log::warn;

/// Echo server: every received message is sent back on the same connection.
#[derive(Debug, Parser)]
struct Cli {
    /// Listen for new connections at address (port 0 picks an ephemeral one)
    address: SocketAddr,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = TransportConfig::default();

    let connections: Arc<Mutex<Vec<Arc<Connection>>>> = Arc::new(Mutex::new(Vec::new()));
    let handler_connections = Arc::clone(&connections);
    let handler_config = config.clone();

    let handler = move |stream: TcpStream| {
        let connection = Arc::new(Connection::from_stream(stream, handler_config.clone()));
        let echo = Arc::downgrade(&connection);
        connection.set_receiver(move |message: StructuredMessage| {
            if let Some(connection) = echo.upgrade() {
                if let Err(e) = connection.send(message) {
                    warn!("echo failed: {e}");
                }
            }
        });
        match connection.start() {
            Ok(()) => handler_connections.lock().unwrap().push(connection),
            Err(e) => warn!("failed to start accepted connection: {e}"),
        }
    };

    let server =
        ServerSocketProcess::new(cli.address.port(), handler, config).bind_address(cli.address.ip());
    server.start()?;

    let endpoint = server.endpoint()?;
    println!("serving on port {}: {:?}", endpoint.port, endpoint.addresses);

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        shutdown_tx.send(()).ok();
    })?;
    shutdown_rx.recv()?;

    server.stop();
    for connection in connections.lock().unwrap().drain(..) {
        connection.stop();
    }
    Ok(())
}

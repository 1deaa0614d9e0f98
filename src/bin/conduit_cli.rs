use std::{error::Error, net::SocketAddr};

use clap::Parser;
use conduit::{
    Connection, Connector, RequestChannel, StructuredMessage, TransportConfig, Value,
};

/// Send one structured message to a server, optionally waiting for a reply.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    address: SocketAddr,
    /// Message fields as name=value pairs (integer values detected)
    fields: Vec<String>,
    /// Perform a request/response round trip instead of a one-way publish
    #[arg(long)]
    request: bool,
}

fn build_message(fields: &[String]) -> Result<StructuredMessage, String> {
    let mut builder = StructuredMessage::builder();
    for entry in fields {
        let (name, raw) = entry
            .split_once('=')
            .ok_or_else(|| format!("field '{entry}' is not name=value"))?;
        let value = match raw.parse::<i64>() {
            Ok(i) => Value::I64(i),
            Err(_) => Value::Str(raw.to_string()),
        };
        builder = builder.push_named(name, value);
    }
    Ok(builder.build())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let message = build_message(&cli.fields)?;

    let config = TransportConfig::default();
    let connector = Connector::new(&config)
        .address(cli.address.ip())
        .port(cli.address.port());

    if cli.request {
        let channel = RequestChannel::new(connector, config);
        channel.send_request(message, |reply| println!("{reply:?}"))?;
        channel.stop();
    } else {
        let connection = Connection::new(connector, config);
        connection.send(message)?;
        connection.stop();
    }
    Ok(())
}

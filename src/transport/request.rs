use std::{
    io::{BufReader, BufWriter},
    net::{Shutdown, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, info, warn};

use super::{
    config::TransportConfig, connection::ConnectionStateListener, connector::Connector,
    error::TransportError, writer::BatchingWriter,
};
use crate::{
    codec::{MessageReader, MessageWriter},
    message::StructuredMessage,
};

struct LiveChannel {
    stream: TcpStream,
    writer: BatchingWriter<BufWriter<TcpStream>>,
    reader: Mutex<MessageReader<BufReader<TcpStream>>>,
    notified: AtomicBool,
}

/// Synchronous, single-flight request/reply over one socket.
///
/// `send_request` writes the request and blocks until the next inbound
/// message arrives, treating it as the response. The message envelope
/// carries no correlation identifier, so the channel supports at most one
/// outstanding request at a time; an exchange lock shared by all callers
/// enforces that by serializing the whole write-plus-read. Callers must not
/// pipeline unrelated requests concurrently on one channel instance against
/// a peer that does not answer strictly in order.
///
/// The response wait has no timeout in this design; production callers that
/// need a bound should impose one externally.
pub struct RequestChannel {
    config: TransportConfig,
    connector: Connector,
    listener: Mutex<Option<Arc<dyn ConnectionStateListener>>>,
    live: Mutex<Option<Arc<LiveChannel>>>,
    exchange: Mutex<()>,
}

impl RequestChannel {
    pub fn new(connector: Connector, config: TransportConfig) -> Self {
        Self {
            config,
            connector,
            listener: Mutex::new(None),
            live: Mutex::new(None),
            exchange: Mutex::new(()),
        }
    }

    pub fn set_state_listener(&self, listener: impl ConnectionStateListener) {
        *self.listener.lock().unwrap() = Some(Arc::new(listener));
    }

    pub fn is_running(&self) -> bool {
        self.live.lock().unwrap().is_some()
    }

    /// Connect and build the writer/reader pair. Idempotent while running.
    pub fn start(&self) -> Result<(), TransportError> {
        let mut live = self.live.lock().unwrap();
        if live.is_some() {
            info!("request channel already started");
            return Ok(());
        }

        let stream = self.connector.connect()?;
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;
        *live = Some(Arc::new(LiveChannel {
            stream,
            writer: BatchingWriter::new(
                MessageWriter::with_limit(BufWriter::new(write_half), self.config.max_frame_len),
                self.config.flush_delay,
            ),
            reader: Mutex::new(MessageReader::with_limit(
                BufReader::new(read_half),
                self.config.max_frame_len,
            )),
            notified: AtomicBool::new(false),
        }));
        Ok(())
    }

    pub fn start_if_necessary(&self) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        debug!("implicit channel start on request");
        self.start()
    }

    /// Close the socket and clear the channel state. Safe when not running.
    pub fn stop(&self) {
        let Some(live) = self.live.lock().unwrap().take() else {
            warn!("request channel not running");
            return;
        };
        // Suppress failure notifications for errors caused by this close.
        live.notified.store(true, Ordering::SeqCst);
        let _ = live.stream.shutdown(Shutdown::Both);
        info!("request channel stopped");
    }

    /// Write `request`, block for the next inbound message and hand it to
    /// `response_receiver`. On failure the channel stops, the state listener
    /// is notified and the error propagates to the caller.
    pub fn send_request<F>(
        &self,
        request: StructuredMessage,
        response_receiver: F,
    ) -> Result<(), TransportError>
    where
        F: FnOnce(StructuredMessage),
    {
        self.start_if_necessary()?;
        let channel = {
            let live = self.live.lock().unwrap();
            Arc::clone(live.as_ref().ok_or(TransportError::NotRunning)?)
        };

        let _exchange = self.exchange.lock().unwrap();
        let outcome = channel
            .writer
            .write(request)
            .and_then(|()| Ok(channel.reader.lock().unwrap().read()?));

        match outcome {
            Ok(response) => {
                response_receiver(response);
                Ok(())
            }
            Err(error) => {
                warn!("request failed: {error}");
                let was_notified = channel.notified.swap(true, Ordering::SeqCst);
                self.stop();
                if !was_notified {
                    if let Some(listener) = self.listener.lock().unwrap().clone() {
                        listener.connection_failed(&error);
                    }
                }
                Err(error)
            }
        }
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

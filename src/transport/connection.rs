use std::{
    cell::Cell,
    io::{BufReader, BufWriter},
    net::{Shutdown, TcpStream},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, error, info, warn};

use super::{
    config::TransportConfig, connector::Connector, error::TransportError, pool::DispatchPool,
    worker::TerminatableWorker, writer::BatchingWriter,
};
use crate::{
    codec::{MessageReader, MessageWriter},
    message::StructuredMessage,
};

/// Callback for inbound messages on a duplex connection.
pub trait MessageReceiver: Send + Sync + 'static {
    fn message_received(&self, message: StructuredMessage);
}

impl<F> MessageReceiver for F
where
    F: Fn(StructuredMessage) + Send + Sync + 'static,
{
    fn message_received(&self, message: StructuredMessage) {
        self(message)
    }
}

/// Observes connection lifecycle failures.
///
/// Fired at most once per connection incarnation, from the thread that
/// detected the failure. A graceful peer close is reported with
/// [`TransportError::Closed`]. This layer never reconnects on its own;
/// owners that want a retry call `start()` again after the notification.
pub trait ConnectionStateListener: Send + Sync + 'static {
    fn connection_failed(&self, error: &TransportError);
}

impl<F> ConnectionStateListener for F
where
    F: Fn(&TransportError) + Send + Sync + 'static,
{
    fn connection_failed(&self, error: &TransportError) {
        self(error)
    }
}

type ReceiverSlot = Arc<Mutex<Option<Arc<dyn MessageReceiver>>>>;
type ListenerSlot = Arc<Mutex<Option<Arc<dyn ConnectionStateListener>>>>;

thread_local! {
    // Set while a failure listener runs on this thread, so a send issued
    // from inside the callback fails fast instead of reopening the socket
    // the callback is reporting on.
    static IN_FAILURE_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

struct Live {
    stream: TcpStream,
    writer: Arc<BatchingWriter<BufWriter<TcpStream>>>,
    worker: TerminatableWorker,
    notified: Arc<AtomicBool>,
}

/// A live socket paired with an inbound read loop and an outbound batching
/// writer.
///
/// Active connections are built over a [`Connector`] and open on `start()`
/// (or lazily on the first `send`); passive connections adopt a socket
/// already accepted by a server. `stop()` then `start()` on an active
/// connection reopens with fresh worker and writer state; the instance is
/// reused, the OS socket is not.
pub struct Connection {
    config: TransportConfig,
    connector: Option<Connector>,
    pending: Mutex<Option<TcpStream>>,
    receiver: ReceiverSlot,
    listener: ListenerSlot,
    pool: Option<Arc<DispatchPool>>,
    live: Mutex<Option<Live>>,
}

impl Connection {
    /// Active role: connects through `connector` on start.
    pub fn new(connector: Connector, config: TransportConfig) -> Self {
        Self::build(Some(connector), None, config)
    }

    /// Passive role: adopts a socket accepted by a server process.
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Self {
        Self::build(None, Some(stream), config)
    }

    fn build(
        connector: Option<Connector>,
        pending: Option<TcpStream>,
        config: TransportConfig,
    ) -> Self {
        let pool = config
            .dispatch_threads
            .map(|size| Arc::new(DispatchPool::new(size)));
        Self {
            config,
            connector,
            pending: Mutex::new(pending),
            receiver: Arc::new(Mutex::new(None)),
            listener: Arc::new(Mutex::new(None)),
            pool,
            live: Mutex::new(None),
        }
    }

    pub fn set_receiver(&self, receiver: impl MessageReceiver) {
        *self.receiver.lock().unwrap() = Some(Arc::new(receiver));
    }

    pub fn set_state_listener(&self, listener: impl ConnectionStateListener) {
        *self.listener.lock().unwrap() = Some(Arc::new(listener));
    }

    pub fn is_running(&self) -> bool {
        self.live
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|l| !l.worker.is_terminated())
    }

    /// Open the socket and spawn the read loop. Idempotent while running.
    pub fn start(&self) -> Result<(), TransportError> {
        let mut live = self.live.lock().unwrap();
        if live.as_ref().is_some_and(|l| !l.worker.is_terminated()) {
            info!("connection already started");
            return Ok(());
        }
        if let Some(mut old) = live.take() {
            old.worker.join_within(self.config.join_timeout);
        }

        let stream = match self.pending.lock().unwrap().take() {
            Some(stream) => {
                stream.set_nodelay(true)?;
                stream
            }
            None => self
                .connector
                .as_ref()
                .ok_or(TransportError::NotConfigured)?
                .connect()?,
        };

        *live = Some(self.open(stream)?);
        Ok(())
    }

    /// Lazy start used by `send`: opens the connection the first time a
    /// send arrives without a prior explicit `start()`. Refused inside a
    /// failure callback; a retry there must call `start()` explicitly.
    pub fn start_if_necessary(&self) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        if IN_FAILURE_CALLBACK.get() {
            debug!("send from a failure callback, refusing implicit restart");
            return Err(TransportError::NotRunning);
        }
        debug!("implicit connection start on send");
        self.start()
    }

    /// Queue `message` on the batching writer. A write failure stops the
    /// connection and notifies the state listener before propagating.
    pub fn send(&self, message: StructuredMessage) -> Result<(), TransportError> {
        self.start_if_necessary()?;
        let (writer, notified) = {
            let live = self.live.lock().unwrap();
            let l = live.as_ref().ok_or(TransportError::NotRunning)?;
            (Arc::clone(&l.writer), Arc::clone(&l.notified))
        };

        match writer.write(message) {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!("send failed: {error}");
                self.stop();
                notify_failure(&self.listener, &notified, &error);
                Err(error)
            }
        }
    }

    /// Terminate the read loop, close the socket (which unblocks any
    /// in-progress read) and wait a bounded time for the worker to exit.
    /// Safe to call when not running.
    pub fn stop(&self) {
        let Some(mut live) = self.live.lock().unwrap().take() else {
            warn!("connection not running");
            return;
        };
        live.worker.terminate();
        let _ = live.stream.shutdown(Shutdown::Both);
        live.worker.join_within(self.config.join_timeout);
        info!("connection stopped");
    }

    fn open(&self, stream: TcpStream) -> Result<Live, TransportError> {
        let peer = stream.peer_addr()?;
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;
        let fail_stream = stream.try_clone()?;

        let writer = Arc::new(BatchingWriter::new(
            MessageWriter::with_limit(BufWriter::new(write_half), self.config.max_frame_len),
            self.config.flush_delay,
        ));
        let mut reader =
            MessageReader::with_limit(BufReader::new(read_half), self.config.max_frame_len);

        let notified = Arc::new(AtomicBool::new(false));
        let receiver = Arc::clone(&self.receiver);
        let listener = Arc::clone(&self.listener);
        let worker_notified = Arc::clone(&notified);
        let pool = self.pool.clone();

        let worker = TerminatableWorker::spawn(&format!("conduit-read-{peer}"), move |flag| {
            read_step(
                &mut reader,
                flag,
                &fail_stream,
                &receiver,
                &listener,
                &worker_notified,
                pool.as_deref(),
            )
        });

        Ok(Live {
            stream,
            writer,
            worker,
            notified,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// One iteration of the inbound read loop. Returns `false` to end the loop.
fn read_step(
    reader: &mut MessageReader<BufReader<TcpStream>>,
    flag: &AtomicBool,
    stream: &TcpStream,
    receiver: &Mutex<Option<Arc<dyn MessageReceiver>>>,
    listener: &Mutex<Option<Arc<dyn ConnectionStateListener>>>,
    notified: &AtomicBool,
    pool: Option<&DispatchPool>,
) -> bool {
    let message = match reader.read() {
        Ok(message) => message,
        Err(e) => {
            let error = TransportError::from(e);
            if flag.load(Ordering::SeqCst) {
                // Deliberate local close; the failed read is expected.
                debug!("read loop exiting after local close: {error}");
            } else {
                if error.is_graceful() {
                    info!("peer closed the connection");
                } else {
                    warn!("read failed: {error}");
                }
                flag.store(true, Ordering::SeqCst);
                let _ = stream.shutdown(Shutdown::Both);
                notify_failure(listener, notified, &error);
            }
            return false;
        }
    };

    let Some(receiver) = receiver.lock().unwrap().clone() else {
        debug!("no receiver registered, dropping inbound message");
        return true;
    };
    match pool {
        Some(pool) => pool.execute(move || deliver(receiver, message)),
        None => deliver(receiver, message),
    }
    true
}

/// Receiver panics are contained here; they must never kill the read loop.
fn deliver(receiver: Arc<dyn MessageReceiver>, message: StructuredMessage) {
    if panic::catch_unwind(AssertUnwindSafe(|| receiver.message_received(message))).is_err() {
        error!("receiver panicked handling an inbound message");
    }
}

fn notify_failure(
    listener: &Mutex<Option<Arc<dyn ConnectionStateListener>>>,
    notified: &AtomicBool,
    error: &TransportError,
) {
    if notified.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(listener) = listener.lock().unwrap().clone() {
        IN_FAILURE_CALLBACK.set(true);
        listener.connection_failed(error);
        IN_FAILURE_CALLBACK.set(false);
    }
}

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Mutex, atomic::Ordering},
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use super::{
    config::TransportConfig,
    endpoint::{EndpointDescriptor, local_interface_addresses},
    error::TransportError,
    worker::TerminatableWorker,
};

/// Hook invoked with each accepted socket, on a dedicated thread per
/// connection. Implementations typically wrap the socket in a passive
/// [`Connection`](super::connection::Connection).
pub trait SocketHandler: Send + Sync + 'static {
    fn socket_opened(&self, stream: TcpStream);
}

impl<F> SocketHandler for F
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    fn socket_opened(&self, stream: TcpStream) {
        self(stream)
    }
}

struct Listening {
    local_addr: SocketAddr,
    worker: TerminatableWorker,
    handlers: Arc<Mutex<Vec<thread::JoinHandle<()>>>>,
}

/// Binds, listens and dispatches accepted sockets to a [`SocketHandler`].
///
/// One dedicated accept thread blocks in `accept()`; `stop()` unblocks it by
/// opening and closing a throwaway loopback connection to the bound port,
/// then joins the thread within the configured bound. Port 0 requests an
/// ephemeral port; the actual port is available after `start()`.
pub struct ServerSocketProcess {
    config: TransportConfig,
    bind_address: Option<IpAddr>,
    port: u16,
    handler: Arc<dyn SocketHandler>,
    inner: Mutex<Option<Listening>>,
}

impl ServerSocketProcess {
    pub fn new(port: u16, handler: impl SocketHandler, config: TransportConfig) -> Self {
        Self {
            config,
            bind_address: None,
            port,
            handler: Arc::new(handler),
            inner: Mutex::new(None),
        }
    }

    /// Restrict the listener to one local address instead of all interfaces.
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// The actual bound port, once started.
    pub fn local_port(&self) -> Option<u16> {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|l| l.local_addr.port())
    }

    /// Bind and spawn the accept loop. Idempotent while running.
    pub fn start(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_some() {
            info!("server already running");
            return Ok(());
        }

        let ip = self
            .bind_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, self.port);
        let listener = bind_listener(addr, self.config.listen_backlog)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("listening at {local_addr}");

        let handlers = Arc::new(Mutex::new(Vec::new()));
        let accept_handlers = Arc::clone(&handlers);
        let handler = Arc::clone(&self.handler);

        // The worker owns the listener, so the socket closes when the
        // accept loop exits.
        let worker = TerminatableWorker::spawn(
            &format!("conduit-accept-{}", local_addr.port()),
            move |flag| {
                reap_finished(&accept_handlers);
                match listener.accept() {
                    Ok((stream, peer)) => {
                        if flag.load(Ordering::SeqCst) {
                            debug!("discarding socket accepted during shutdown from {peer}");
                            return false;
                        }
                        info!("accepted connection from {peer}");
                        let handler = Arc::clone(&handler);
                        let handle = thread::Builder::new()
                            .name(format!("conduit-conn-{peer}"))
                            .spawn(move || handler.socket_opened(stream))
                            .expect("failed to spawn connection handler");
                        accept_handlers.lock().unwrap().push(handle);
                        true
                    }
                    Err(e) => {
                        if flag.load(Ordering::SeqCst) {
                            debug!("accept interrupted for shutdown: {e}");
                            false
                        } else {
                            warn!("broken connection: {e:?}");
                            true
                        }
                    }
                }
            },
        );

        *inner = Some(Listening {
            local_addr,
            worker,
            handlers,
        });
        Ok(())
    }

    /// Terminate the accept loop and close the listener. The accept thread
    /// is blocked inside `accept()`, so a short-lived loopback connection to
    /// the bound port forces it to return; the join is bounded by the
    /// configured timeout and the process proceeds regardless.
    pub fn stop(&self) {
        let Some(mut listening) = self.inner.lock().unwrap().take() else {
            warn!("server not running");
            return;
        };

        listening.worker.terminate();
        let poke_ip = match listening.local_addr.ip() {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        let poke = SocketAddr::new(poke_ip, listening.local_addr.port());
        match TcpStream::connect_timeout(&poke, Duration::from_secs(1)) {
            Ok(stream) => drop(stream),
            Err(e) => debug!("shutdown poke to {poke} failed: {e}"),
        }
        listening.worker.join_within(self.config.join_timeout);

        reap_finished(&listening.handlers);
        drop(listening);
        info!("server stopped");
    }

    /// Descriptor for reaching this server: the bound address, or every
    /// non-loopback interface address when bound to a wildcard.
    pub fn endpoint(&self) -> Result<EndpointDescriptor, TransportError> {
        let inner = self.inner.lock().unwrap();
        let listening = inner.as_ref().ok_or(TransportError::NotRunning)?;

        let ip = listening.local_addr.ip();
        let addresses = if ip.is_unspecified() {
            let found = local_interface_addresses();
            if found.is_empty() {
                // Interface enumeration can come up empty in minimal
                // environments; loopback at least reaches local peers.
                vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
            } else {
                found
            }
        } else {
            vec![ip]
        };

        Ok(EndpointDescriptor::new(
            addresses,
            listening.local_addr.port(),
        ))
    }
}

impl Drop for ServerSocketProcess {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Pre-accept housekeeping: join per-connection handler threads that have
/// already finished.
fn reap_finished(handlers: &Mutex<Vec<thread::JoinHandle<()>>>) {
    let mut handlers = handlers.lock().unwrap();
    let mut kept = Vec::with_capacity(handlers.len());
    for handle in handlers.drain(..) {
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("connection handler panicked");
            }
        } else {
            kept.push(handle);
        }
    }
    *handlers = kept;
}

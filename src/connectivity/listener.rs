//! Listener coordinator
//!
//! Binds the TCP socket the reachability probe connects to. The socket
//! speaks no protocol: each accepted connection is read once, its payload
//! logged, and closed.
//!
//! Lifetime: the accept loop runs in one spawned task, and every accepted
//! connection gets its own handler task inside a `JoinSet` owned by that
//! loop. Shutting down (or dropping) the `ListenerHandle` ends the loop,
//! which drops the set and aborts any handlers still running.

use crate::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Bytes read from each accepted connection
pub const READ_BUFFER_SIZE: usize = 1024;

/// Firing half of a one-shot readiness signal
///
/// `fire` consumes the trigger, so it can fire at most once.
#[derive(Debug)]
pub struct ReadyTrigger {
    tx: watch::Sender<Option<SocketAddr>>,
}

/// Observing half of a one-shot readiness signal
///
/// Observers that arrive before the signal fires block until it does;
/// later observers return immediately.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: watch::Receiver<Option<SocketAddr>>,
}

/// Create a linked trigger/signal pair
pub fn ready_channel() -> (ReadyTrigger, ReadySignal) {
    let (tx, rx) = watch::channel(None);
    (ReadyTrigger { tx }, ReadySignal { rx })
}

impl ReadyTrigger {
    /// Announce readiness with the bound address
    pub fn fire(self, addr: SocketAddr) {
        // Only fails when every signal was dropped; nobody is waiting then
        let _ = self.tx.send(Some(addr));
    }
}

impl ReadySignal {
    /// Wait for readiness
    ///
    /// Returns `None` if the trigger was dropped without firing.
    pub async fn wait(&mut self) -> Option<SocketAddr> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(addr) => *addr,
            Err(_) => None,
        }
    }

    /// Whether readiness has already fired
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// What happened on one accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Remote address
    pub peer: SocketAddr,
    /// First read's bytes, or the read error
    pub payload: std::result::Result<Vec<u8>, String>,
}

/// Owns the bound socket for the lifetime of a run
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    ready: ReadySignal,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Starts listeners
pub struct ListenerCoordinator;

impl ListenerCoordinator {
    /// Bind `0.0.0.0:port` and start accepting
    ///
    /// `port == 0` lets the OS pick an ephemeral port. A bind failure is
    /// returned directly and no readiness signal is ever sent.
    pub async fn start(port: u16) -> Result<ListenerHandle> {
        Self::start_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    /// Bind an explicit address and start accepting
    pub async fn start_on(addr: SocketAddr) -> Result<ListenerHandle> {
        info!("Starting TCP listener on {}", addr);

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Error starting TCP listener on {}: {}", addr, e);
            Error::ListenerBind {
                port: addr.port(),
                source: e,
            }
        })?;

        // Resolve the real port before anyone is told we're ready
        let local_addr = listener.local_addr()?;

        let (trigger, ready) = ready_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(accept_loop(
            listener,
            local_addr,
            trigger,
            events_tx,
            shutdown_rx,
        ));

        Ok(ListenerHandle {
            local_addr,
            ready,
            events: Some(events_rx),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

impl ListenerHandle {
    /// Bound address, including an OS-assigned port
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// A fresh observer of the readiness signal
    pub fn ready_signal(&self) -> ReadySignal {
        self.ready.clone()
    }

    /// Block until the accept loop is live
    pub async fn await_ready(&self) -> Result<SocketAddr> {
        self.ready
            .clone()
            .wait()
            .await
            .ok_or_else(|| Error::Listener("Listener stopped before becoming ready".to_string()))
    }

    /// Take the stream of accepted-connection events (only once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    /// Stop accepting and wait for the accept loop to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Listener on {} closed", self.local_addr);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    trigger: ReadyTrigger,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!("TCP listener ready on port {}", local_addr.port());
    trigger.fire(local_addr);

    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Shutdown requested for listener on {}", local_addr);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    handlers.spawn(handle_connection(stream, peer, events.clone()));
                }
                Err(e) => {
                    debug!("Error accepting connection: {}", e);
                }
            },
            // Reap finished handlers so the set doesn't grow unbounded
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }

    handlers.shutdown().await;
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let payload = match stream.read(&mut buf).await {
        Ok(n) => {
            info!(
                "Received {} bytes from {}: {}",
                n,
                peer,
                String::from_utf8_lossy(&buf[..n])
            );
            Ok(buf[..n].to_vec())
        }
        Err(e) => {
            debug!("Error reading from {}: {}", peer, e);
            Err(e.to_string())
        }
    };

    // Observer may have gone away; the connection is closed on return either way
    let _ = events.send(ConnectionEvent { peer, payload });
}

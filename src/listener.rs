use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{DispatchMode, ListenerConfig};

/// Decoding of one raw datagram into (possibly) a completed logical packet.
///  This is the seam between the listener's socket loop and the two protocol
///  directions, which share the loop but not the cryptographic contract.
pub trait DatagramDecoder: Send + Sync + 'static {
    type Packet: Send + 'static;

    /// Feed one datagram. `Ok(None)` means the datagram was consumed but no
    ///  logical packet completed yet; `Err` means it was rejected and is to be
    ///  dropped without any reply to the peer.
    fn handle(&self, now: Instant, datagram: &[u8]) -> anyhow::Result<Option<Self::Packet>>;

    /// Expire stale partial state. Invoked periodically by the owning listener.
    fn cleanup(&self, now: Instant);
}

/// Application callback for completed packets. The handler gets the listener's
///  socket so it can send replies to `from` (responses travel over the same
///  socket the request arrived on).
#[async_trait]
pub trait PacketHandler<P: Send + 'static>: Send + Sync + 'static {
    async fn on_packet(&self, packet: P, from: SocketAddr, socket: &UdpSocket);
}

/// One UDP socket plus the receive loop feeding a [DatagramDecoder].
///
/// The loop is strictly serial by default (see [DispatchMode]): decode,
///  dispatch, then block on the next receive. Rejected datagrams are logged
///  and dropped - never answered, an answer would tell a probing attacker
///  which of its guesses get past which check.
pub struct Listener<D: DatagramDecoder> {
    socket: Arc<UdpSocket>,
    decoder: D,
    config: ListenerConfig,
    cancel_sender: broadcast::Sender<()>,
    packets_received: AtomicU64,
}

impl<D: DatagramDecoder> Listener<D> {
    pub async fn bind(bind_addr: SocketAddr, decoder: D, config: ListenerConfig) -> anyhow::Result<Listener<D>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!("bound listener socket to {:?}", socket.local_addr()?);

        let (cancel_sender, _) = broadcast::channel(1);

        Ok(Listener {
            socket,
            decoder,
            config,
            cancel_sender,
            packets_received: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The listener's socket, for sending from outside a handler (e.g. a
    ///  client submitting requests over the socket it listens on).
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Number of non-empty datagrams received so far. Purely observational,
    ///  updated outside any lock.
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Run the receive loop until [Listener::shut_down] is called. Datagrams
    ///  are processed strictly serially unless the config opts into concurrent
    ///  dispatch; either way the loop itself never blocks on anything but the
    ///  socket (and, in concurrent mode, the in-flight cap).
    pub async fn recv_loop(&self, handler: Arc<dyn PacketHandler<D::Packet>>) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer_len];
        let mut cancel_receiver = self.cancel_sender.subscribe();
        let mut last_cleanup = Instant::now();

        let dispatch_permits = match self.config.dispatch {
            DispatchMode::Serial => None,
            DispatchMode::Concurrent { max_in_flight } => Some(Arc::new(Semaphore::new(max_in_flight))),
        };

        info!("starting receive loop");

        loop {
            tokio::select! {
                r = self.socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, from)) => {
                            if len > 0 {
                                self.packets_received.fetch_add(1, Ordering::Relaxed);

                                let now = Instant::now();
                                match self.decoder.handle(now, &buf[..len]) {
                                    Ok(Some(packet)) => {
                                        self.dispatch(packet, from, &handler, &dispatch_permits).await;
                                    }
                                    Ok(None) => {
                                        // fragment recorded, the logical packet is not complete yet
                                    }
                                    Err(e) => {
                                        debug!("dropping datagram from {:?}: {:#}", from, e);
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!("socket error: {}", e);
                        }
                    }

                    let now = Instant::now();
                    if now.duration_since(last_cleanup) >= self.config.cleanup_interval {
                        last_cleanup = now;
                        self.decoder.cleanup(now);
                    }
                }
                _ = cancel_receiver.recv() => break,
            }
        }

        info!("receive loop shut down");
        Ok(())
    }

    async fn dispatch(
        &self,
        packet: D::Packet,
        from: SocketAddr,
        handler: &Arc<dyn PacketHandler<D::Packet>>,
        dispatch_permits: &Option<Arc<Semaphore>>,
    ) {
        match dispatch_permits {
            None => {
                handler.on_packet(packet, from, &self.socket).await;
            }
            Some(permits) => {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("dispatch semaphore closed: {}", e);
                        return;
                    }
                };

                let handler = handler.clone();
                let socket = self.socket.clone();
                tokio::spawn(async move {
                    handler.on_packet(packet, from, &socket).await;
                    drop(permit);
                });
            }
        }
    }

    /// Unblock and terminate the receive loop. Safe to call from any task;
    ///  calling it with no loop running is a no-op.
    pub fn shut_down(&self) {
        if let Err(err) = self.cancel_sender.send(()) {
            warn!(?err, "shutting down a listener whose receive loop is not running");
        }
    }
}

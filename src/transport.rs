//! # Transport abstraction
//!
//! The [Transport] trait is the seam between an entity and the underlying communication link.
//! Outbound PDUs are passed to [Transport::request]. Inbound PDUs are delivered by the transport
//! to a [crate::entity::PduHandler] of the entity, which decodes them and enqueues the resulting
//! events.
//!
//! [UdpTransport] is a simple datagram transport: each PDU is one UDP datagram.
use core::time::Duration;
use std::boxed::Box;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::vec;
use std::vec::Vec;

use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("transport is not ready")]
    NotReady,
    #[error("receiver disconnected")]
    RxDisconnected,
    #[error("no remote peer configured")]
    NoPeer,
    #[error("indication handler is already running")]
    AlreadyBound,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub trait Transport: Send + Sync {
    /// Send one raw PDU.
    fn request(&self, raw_pdu: &[u8]) -> Result<(), TransportError>;

    /// Senders only emit file data while the transport is ready.
    fn is_ready(&self) -> bool {
        true
    }
}

impl Transport for mpsc::Sender<Vec<u8>> {
    fn request(&self, raw_pdu: &[u8]) -> Result<(), TransportError> {
        self.send(raw_pdu.to_vec())
            .map_err(|_| TransportError::RxDisconnected)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, raw_pdu: &[u8]) -> Result<(), TransportError> {
        (**self).request(raw_pdu)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

pub const MAX_DATAGRAM_SIZE: usize = 65535;

const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// UDP transport which sends every PDU to all connected peers.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peers: RwLock<Vec<SocketAddr>>,
    running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        Ok(Self {
            socket: UdpSocket::bind(addr)?,
            peers: RwLock::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            rx_thread: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn connect(&self, peer: SocketAddr) {
        let mut peers = self.peers.write();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn disconnect(&self, peer: SocketAddr) {
        self.peers.write().retain(|addr| *addr != peer);
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.read().clone()
    }

    /// Start a thread which passes every received datagram to the indication handler.
    pub fn start_indication(
        &self,
        mut handler: Box<dyn FnMut(&[u8]) + Send>,
    ) -> Result<(), TransportError> {
        let mut rx_thread = self.rx_thread.lock();
        if rx_thread.is_some() {
            return Err(TransportError::AlreadyBound);
        }
        let socket = self.socket.try_clone()?;
        socket.set_read_timeout(Some(RECEIVE_POLL_INTERVAL))?;
        self.running.store(true, Ordering::Relaxed);
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("cfdp-udp-rx".into())
            .spawn(move || {
                let mut buf = vec![0; MAX_DATAGRAM_SIZE];
                while running.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, addr)) => {
                            debug!("received {len} bytes from {addr}");
                            handler(&buf[0..len]);
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) => {}
                        Err(e) => {
                            error!("UDP receive error: {e}");
                            break;
                        }
                    }
                }
            })?;
        *rx_thread = Some(handle);
        Ok(())
    }

    /// Stop the indication thread.
    pub fn unbind(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.lock().take() {
            if handle.join().is_err() {
                error!("UDP receive thread panicked");
            }
        }
    }
}

impl Transport for UdpTransport {
    fn request(&self, raw_pdu: &[u8]) -> Result<(), TransportError> {
        let peers = self.peers.read();
        if peers.is_empty() {
            return Err(TransportError::NoPeer);
        }
        for peer in peers.iter() {
            if let Err(e) = self.socket.send_to(raw_pdu, peer) {
                warn!("sending {} bytes to {peer} failed: {e}", raw_pdu.len());
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.unbind();
    }
}

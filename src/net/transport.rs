//! The raw packet backend: `net_send`/the ingress callback from the spec's collaborator
//! list, made concrete.
//!
//! The spec explicitly puts the actual wire transmission and interrupt-driven packet
//! arrival out of scope (`net_send`, `network_interrupt`) — they're assumed
//! collaborators, not something this crate defines the behavior of. Rather than leave
//! that as an unfillable trait, this rewrite gives it one concrete, safe
//! implementation: [`UdpTransport`], which maps the spec's abstract 64-bit "network
//! address" onto a loopback UDP port and runs the "interrupt handler" as an ordinary
//! background thread reading from a real socket. Grounded on
//! `examples/other_examples` socket-server patterns (a `recv` loop on its own thread
//! handing bytes to a registered callback) rather than anything in the teacher, since
//! the teacher's own network stack speaks Ethernet/IPv4 directly on hardware.

use crate::error::{RuntimeError, RuntimeResult};
use std::net::UdpSocket;
use std::sync::Mutex;
use std::thread;

/// A callback invoked once per received raw packet, handed the packet bytes.
pub type IngressHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// The seam between this runtime and whatever actually moves bytes between hosts.
/// `send` is the spec's `net_send`; `set_ingress` is how this runtime registers the
/// spec's `network_interrupt` handler.
pub trait RawTransport: Send + Sync {
    fn send(&self, dst_addr: u64, bytes: &[u8]) -> RuntimeResult<()>;
    fn local_addr(&self) -> u64;
    fn set_ingress(&self, handler: IngressHandler);
}

/// Loopback-UDP-backed transport: every runtime using this transport within the same
/// process (or host) is addressed by the UDP port it's bound to, so `addr` doubles as
/// a `u16` port number.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: u64,
    ingress: Mutex<Option<()>>,
}

impl UdpTransport {
    pub fn bind_loopback(port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", port))?;
        let local_port = socket.local_addr()?.port();
        Ok(UdpTransport { socket, local_addr: local_port as u64, ingress: Mutex::new(None) })
    }
}

impl RawTransport for UdpTransport {
    fn send(&self, dst_addr: u64, bytes: &[u8]) -> RuntimeResult<()> {
        let dst_port = u16::try_from(dst_addr).map_err(|_| RuntimeError::SendError)?;
        self.socket
            .send_to(bytes, ("127.0.0.1", dst_port))
            .map(|_| ())
            .map_err(|_| RuntimeError::SendError)
    }

    fn local_addr(&self) -> u64 {
        self.local_addr
    }

    /// Spawns the background "interrupt" thread. Intended to be called exactly once,
    /// by `Runtime::new` at construction; a second call replaces the registered
    /// handler but leaves the first reader thread running against a stale callback
    /// slot, so `demux::install` is careful to call this only once per runtime.
    fn set_ingress(&self, handler: IngressHandler) {
        *self.ingress.lock().unwrap() = Some(());
        let sock = self.socket.try_clone().expect("clone loopback udp socket for ingress thread");
        thread::Builder::new()
            .name("raw-transport-ingress".into())
            .spawn(move || {
                let mut buf = [0u8; 2048];
                loop {
                    match sock.recv(&mut buf) {
                        Ok(n) => handler(&buf[..n]),
                        Err(_) => break,
                    }
                }
            })
            .expect("spawn raw transport ingress thread");
    }
}

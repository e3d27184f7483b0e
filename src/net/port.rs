//! `minimsg`: unreliable datagram ports, split into the unbound (listening) range
//! `0..=32767` and the bound (addressed) range `32768..=65535`.
//!
//! Grounded on `examples/original_source/P1-P4/minimsg.c`'s two-array-of-ports
//! design and its rotating-cursor bound-port allocator (`create_bound` scans forward
//! from the last-allocated port rather than always starting at the bottom of the
//! range, so short-lived bound ports churn instead of starving the same handful of
//! numbers).

use crate::error::{RuntimeError, RuntimeResult};
use crate::net::header::{Addr, DatagramHeader, BOUND_PORT_MIN, PORT_MAX, UNBOUND_PORT_MAX};
use crate::sync::semaphore::Semaphore;
use crate::task::thread::ThreadId;
use crate::Handle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One endpoint: either a listening (unbound) port accepting datagrams from any
/// sender, or a bound port addressed at one specific remote.
pub struct Miniport {
    pub port: u16,
    pub remote: Option<Addr>,
    queue: Mutex<VecDeque<(Addr, Vec<u8>)>>,
    arrived: Semaphore,
}

impl Miniport {
    fn new(port: u16, remote: Option<Addr>) -> Arc<Self> {
        Arc::new(Miniport {
            port,
            remote,
            queue: Mutex::new(VecDeque::new()),
            arrived: Semaphore::new(0),
        })
    }

    /// Enqueue an arrived datagram and wake one receiver, if any is waiting.
    fn deliver(&self, rt: &Handle, from: Addr, payload: Vec<u8>) {
        self.queue.lock().unwrap().push_back((from, payload));
        self.arrived.v(rt);
    }

    /// Block until a datagram has arrived, then return it.
    pub fn receive(&self, rt: &Handle, me: ThreadId) -> (Addr, Vec<u8>) {
        self.arrived.p(rt, me);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("semaphore count guarantees a queued datagram")
    }
}

/// Registry of live miniports, keyed by port number.
pub struct PortTable {
    unbound: Mutex<HashMap<u16, Arc<Miniport>>>,
    bound: Mutex<HashMap<u16, Arc<Miniport>>>,
    bound_cursor: Mutex<u16>,
}

impl PortTable {
    pub fn new() -> Self {
        PortTable {
            unbound: Mutex::new(HashMap::new()),
            bound: Mutex::new(HashMap::new()),
            bound_cursor: Mutex::new(BOUND_PORT_MIN),
        }
    }

    /// Create a listening port at a caller-chosen number in `0..=32767`. A repeat call
    /// for a number already in use returns the existing port rather than an error,
    /// per spec §4.4.
    pub fn create_unbound(&self, port: u16) -> RuntimeResult<Arc<Miniport>> {
        if port > UNBOUND_PORT_MAX {
            return Err(RuntimeError::InvalidParams);
        }
        let mut table = self.unbound.lock().unwrap();
        if table.contains_key(&port) {
            return Ok(table.get(&port).unwrap().clone());
        }
        let mp = Miniport::new(port, None);
        table.insert(port, mp.clone());
        Ok(mp)
    }

    /// Create a bound port addressed at `remote`, assigning the next free number from
    /// the rotating cursor over `32768..=65535`.
    pub fn create_bound(&self, remote: Addr) -> RuntimeResult<Arc<Miniport>> {
        let mut table = self.bound.lock().unwrap();
        let mut cursor = self.bound_cursor.lock().unwrap();
        let span = (PORT_MAX - BOUND_PORT_MIN) as u32 + 1;
        for _ in 0..span {
            let candidate = *cursor;
            *cursor = if candidate == PORT_MAX { BOUND_PORT_MIN } else { candidate + 1 };
            if !table.contains_key(&candidate) {
                let mp = Miniport::new(candidate, Some(remote));
                table.insert(candidate, mp.clone());
                return Ok(mp);
            }
        }
        Err(RuntimeError::NoMorePorts)
    }

    pub fn destroy_unbound(&self, port: u16) {
        self.unbound.lock().unwrap().remove(&port);
    }

    pub fn destroy_bound(&self, port: u16) {
        self.bound.lock().unwrap().remove(&port);
    }

    /// `minimsg_send(src_unbound, dst_bound, payload)`: build the 21-byte datagram
    /// header (source = this runtime's transport address + `src_unbound`'s port
    /// number, destination = `dst_bound`'s configured remote) and hand it to the
    /// transport. `payload` must fit within `RuntimeConfig::max_datagram_payload`.
    pub fn send(
        &self,
        rt: &Handle,
        src_unbound: &Miniport,
        dst_bound: &Miniport,
        payload: &[u8],
    ) -> RuntimeResult<usize> {
        if payload.len() > rt.config().max_datagram_payload {
            return Err(RuntimeError::InvalidParams);
        }
        let remote = dst_bound.remote.ok_or(RuntimeError::InvalidParams)?;
        let hdr = DatagramHeader {
            src: Addr { addr: rt.transport.local_addr(), port: src_unbound.port },
            dst: remote,
        };
        let mut packet = hdr.pack().to_vec();
        packet.extend_from_slice(payload);
        rt.transport.send(remote.addr, &packet).map_err(|_| RuntimeError::SendError)?;
        Ok(payload.len())
    }

    /// `minimsg_receive(local_unbound, &reply_port, buf, &len)`: block until a
    /// datagram arrives on `local`, then synthesize a fresh bound port addressed back
    /// to the sender so the caller can reply without re-resolving the address.
    pub fn receive(
        &self,
        rt: &Handle,
        local: &Miniport,
        me: ThreadId,
    ) -> RuntimeResult<(Arc<Miniport>, Vec<u8>)> {
        let (from, payload) = local.receive(rt, me);
        let reply = self.create_bound(from)?;
        Ok((reply, payload))
    }

    /// Route an arrived datagram to its destination miniport. Silently drops (the
    /// spec's `NOSERVER` case) if no miniport owns `dst_port`.
    pub fn deliver(&self, rt: &Handle, dst_port: u16, from: Addr, payload: Vec<u8>) {
        let target = if dst_port <= UNBOUND_PORT_MAX {
            self.unbound.lock().unwrap().get(&dst_port).cloned()
        } else {
            self.bound.lock().unwrap().get(&dst_port).cloned()
        };
        match target {
            Some(mp) => mp.deliver(rt, from, payload),
            None => log::debug!("datagram for unknown port {dst_port} dropped"),
        }
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::net::transport::UdpTransport;
    use crate::task::scheduler::Runtime;

    fn test_runtime() -> Handle {
        let transport = Arc::new(UdpTransport::bind_loopback(0).expect("bind loopback"));
        Runtime::with_config(transport, RuntimeConfig::fast_for_tests())
    }

    #[test]
    fn create_unbound_is_idempotent_for_same_number() {
        let rt = test_runtime();
        let a = rt.ports.create_unbound(42).expect("first create");
        let b = rt.ports.create_unbound(42).expect("repeat create returns existing port");
        assert_eq!(a.port, 42);
        assert_eq!(b.port, 42);
    }

    #[test]
    fn create_unbound_rejects_out_of_range() {
        let rt = test_runtime();
        assert_eq!(
            rt.ports.create_unbound(UNBOUND_PORT_MAX + 1).unwrap_err(),
            RuntimeError::InvalidParams
        );
    }

    #[test]
    fn bound_cursor_rotates_and_does_not_reuse_live_ports() {
        let rt = test_runtime();
        let remote = Addr { addr: 1, port: 9 };
        let a = rt.ports.create_bound(remote).unwrap();
        let b = rt.ports.create_bound(remote).unwrap();
        assert_ne!(a.port, b.port);
        assert!(a.port >= BOUND_PORT_MIN && b.port >= BOUND_PORT_MIN);
    }

    #[test]
    fn send_then_receive_round_trips_payload_and_reply_addr() {
        let server_rt = test_runtime();
        let client_rt = test_runtime();
        let server_port = 5000u16;
        let server_addr = Addr { addr: server_rt.transport.local_addr(), port: server_port };

        let received = Arc::new(Mutex::new(None));
        let r = received.clone();
        server_rt.fork(
            "listener",
            Box::new(move |rt| {
                let me = rt.self_id();
                let local = rt.ports.create_unbound(server_port).expect("create_unbound");
                let (reply, payload) = rt.ports.receive(&rt, &local, me).expect("receive");
                *r.lock().unwrap() = Some((reply.remote, payload));
            }),
        );
        std::thread::sleep(std::time::Duration::from_millis(30));

        client_rt.fork(
            "sender",
            Box::new(move |rt| {
                let me = rt.self_id();
                let local = rt.ports.create_unbound(5001).expect("create_unbound");
                let _ = me;
                let dst = rt.ports.create_bound(server_addr).expect("create_bound");
                rt.ports.send(&rt, &local, &dst, b"hello").expect("send");
            }),
        );

        client_rt.join_idle();
        server_rt.join_idle();
        let (reply_remote, payload) = received.lock().unwrap().take().expect("datagram arrived");
        assert_eq!(payload, b"hello");
        assert_eq!(reply_remote.unwrap().addr, client_rt.transport.local_addr());
    }

    #[test]
    fn send_rejects_oversized_payload() {
        let rt = test_runtime();
        let local = rt.ports.create_unbound(1).unwrap();
        let dst = rt.ports.create_bound(Addr { addr: 1, port: 1 }).unwrap();
        let oversized = vec![0u8; rt.config().max_datagram_payload + 1];
        assert_eq!(rt.ports.send(&rt, &local, &dst, &oversized).unwrap_err(), RuntimeError::InvalidParams);
    }
}

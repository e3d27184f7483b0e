//! `minisocket`: a reliable byte-stream transport layered over the unreliable
//! datagram primitive, using stop-and-wait ARQ with exponential-backoff retransmit.
//!
//! Grounded on `examples/original_source/P1-P4/minisocket.c`: the 7-state handshake
//! (`INITIAL -> WAITING_SYN{,ACK} -> OPEN -> CLOSING -> CLOSED`), one fragment
//! in flight at a time, doubling retransmit timeout capped at `12800ms` after
//! `100ms`, and a `15s` linger after a peer's `FIN` so a late-arriving retransmitted
//! `FIN` still gets acknowledged instead of bouncing off a torn-down socket. There are
//! exactly four wire message types (`SYN`, `SYNACK`, `ACK`, `FIN`): a plain data
//! segment is an `ACK`-typed packet carrying a payload, and a `FIN` is acknowledged
//! with a bare `ACK` rather than a dedicated fifth type.

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::net::header::{Addr, DatagramHeader, MsgType, StreamHeader, UNBOUND_PORT_MAX};
use crate::sync::mutex::Mutex as SleepMutex;
use crate::sync::semaphore::Semaphore;
use crate::task::thread::ThreadId;
use crate::Handle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Connection state, matching the spec's state machine one-for-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Initial,
    WaitingSyn,
    WaitingSynAck,
    WaitingAck,
    Open,
    Closing,
    Closed,
}

/// Maximum SYN/data retransmissions before giving up: doubling `100ms` until it would
/// exceed the `12800ms` cap is 8 terms, plus one more attempt at the capped value.
const MAX_RETRIES: u32 = 8;

struct Inner {
    state: ConnState,
    remote: Option<Addr>,
    /// `current_seq`: the sequence number the next outgoing data fragment will use.
    send_seq: u32,
    /// `ack_number`: the next byte this side expects to receive.
    recv_next: u32,
    recv_buf: VecDeque<u8>,
    /// Holds the most recent control/ack message not yet claimed by a waiting
    /// handshake or `data_send_wait` loop. The protocol is strictly stop-and-wait with
    /// one outstanding app-level call at a time (guarded by `io_lock`), so a single
    /// slot rather than a queue is sufficient.
    mailbox: Option<StreamHeader>,
}

/// One reliable connection endpoint.
pub struct StreamSocket {
    rt: Handle,
    local_port: u16,
    inner: Mutex<Inner>,
    /// Woken by every arrived control/ack packet and every retransmit-timeout alarm;
    /// a waiter disambiguates by re-checking `inner` after waking. The spec describes
    /// a separate data-ready and ack-wait semaphore; this socket uses one, since at
    /// most one of {handshake, data-send-wait, receive} is ever pending at a time
    /// thanks to `io_lock` serializing all application calls (see `DESIGN.md`).
    wake: Semaphore,
    /// Serializes `send`/`receive`/`close` against each other, per spec §5 ("the
    /// socket send/receive mutex ... serializes application calls").
    io_lock: SleepMutex<()>,
    config: RuntimeConfig,
}

impl StreamSocket {
    fn new(rt: &Handle, local_port: u16) -> Arc<Self> {
        Arc::new(StreamSocket {
            rt: rt.clone(),
            local_port,
            inner: Mutex::new(Inner {
                state: ConnState::Initial,
                remote: None,
                send_seq: 0,
                recv_next: 0,
                recv_buf: VecDeque::new(),
                mailbox: None,
            }),
            wake: Semaphore::new(0),
            io_lock: SleepMutex::new(()),
            config: rt.config().clone(),
        })
    }

    pub fn state(&self) -> ConnState {
        self.inner.lock().unwrap().state
    }

    /// Client side of the handshake: bind a fresh port to `remote`, send `SYN`, and
    /// retransmit with doubling backoff until a `SYNACK` arrives or retries are
    /// exhausted.
    pub fn connect(rt: &Handle, me: ThreadId, remote: Addr) -> RuntimeResult<Arc<Self>> {
        let local_port = rt.ports.create_bound(remote).map(|mp| mp.port)?;
        let sock = Self::new(rt, local_port);
        {
            let mut inner = sock.inner.lock().unwrap();
            inner.state = ConnState::WaitingSynAck;
            inner.remote = Some(remote);
        }
        if let Err(e) = rt.streams.register(local_port, sock.clone()) {
            rt.ports.destroy_bound(local_port);
            return Err(e);
        }

        let result = Self::handshake_send_wait(&sock, me, remote, MsgType::Syn, 0, 0, |hdr| {
            matches!(hdr.msg_type, MsgType::SynAck | MsgType::Fin)
        });
        match result {
            Some(hdr) if hdr.msg_type == MsgType::Fin => {
                rt.streams.deregister(local_port);
                rt.ports.destroy_bound(local_port);
                Err(RuntimeError::NoServer)
            }
            Some(synack) => {
                let mut inner = sock.inner.lock().unwrap();
                inner.state = ConnState::Open;
                inner.recv_next = synack.seq.wrapping_add(1);
                inner.send_seq = 2;
                drop(inner);
                sock.send_control(remote, MsgType::Ack, 1, synack.seq.wrapping_add(1));
                Ok(sock)
            }
            None => {
                rt.streams.deregister(local_port);
                rt.ports.destroy_bound(local_port);
                Err(RuntimeError::NoServer)
            }
        }
    }

    /// Server side: listen on `port` for one incoming connection, completing the
    /// handshake before returning. A stray `SYN` from a second remote while waiting
    /// on the first is answered with `FIN` rather than disturbing the handshake in
    /// progress.
    pub fn listen(rt: &Handle, me: ThreadId, port: u16) -> RuntimeResult<Arc<Self>> {
        if port > UNBOUND_PORT_MAX {
            return Err(RuntimeError::InvalidParams);
        }
        let sock = Self::new(rt, port);
        sock.inner.lock().unwrap().state = ConnState::WaitingSyn;
        rt.streams.register(port, sock.clone())?;

        loop {
            sock.wake.p(rt, me);
            let header = {
                let mut inner = sock.inner.lock().unwrap();
                match inner.mailbox.take() {
                    Some(h) if h.msg_type == MsgType::Syn => h,
                    _ => continue,
                }
            };
            let remote = header.datagram.src;
            {
                let mut inner = sock.inner.lock().unwrap();
                inner.remote = Some(remote);
                inner.state = ConnState::WaitingAck;
                inner.recv_next = header.seq.wrapping_add(1);
            }
            let got = Self::handshake_send_wait(
                &sock,
                me,
                remote,
                MsgType::SynAck,
                0,
                header.seq.wrapping_add(1),
                |hdr| hdr.msg_type == MsgType::Ack,
            );
            if got.is_some() {
                let mut inner = sock.inner.lock().unwrap();
                inner.state = ConnState::Open;
                inner.send_seq = 1;
                // the client's bare handshake ACK consumes one sequence slot, same as
                // the SYN and SYNACK before it.
                inner.recv_next = inner.recv_next.wrapping_add(1);
                return Ok(sock);
            }
            // SYNACK retries exhausted: back to listening for a fresh SYN.
            let mut inner = sock.inner.lock().unwrap();
            inner.state = ConnState::WaitingSyn;
            inner.remote = None;
        }
    }

    /// Send one control message, then retransmit with doubling backoff (capped) until
    /// `accept` matches the mailbox contents or retries run out.
    fn handshake_send_wait(
        self: &Arc<Self>,
        me: ThreadId,
        remote: Addr,
        msg: MsgType,
        seq: u32,
        ack: u32,
        accept: impl Fn(&StreamHeader) -> bool,
    ) -> Option<StreamHeader> {
        let mut timeout = self.config.retransmit_initial;
        for attempt in 0..=MAX_RETRIES {
            self.send_control(remote, msg, seq, ack);
            if attempt == MAX_RETRIES {
                break;
            }
            let woken = self.clone();
            let alarm_id = self
                .rt
                .register_alarm(timeout.as_millis() as u64, Box::new(move |rt| woken.wake.v(rt)));
            self.wake.p(&self.rt, me);
            self.rt.deregister_alarm(alarm_id);
            let mut inner = self.inner.lock().unwrap();
            if let Some(h) = inner.mailbox.take() {
                if accept(&h) {
                    return Some(h);
                }
                // not the message this wait is for; leave it for whoever else cares
                inner.mailbox = Some(h);
            }
            drop(inner);
            timeout = (timeout * 2).min(self.config.retransmit_cap);
        }
        None
    }

    fn send_control(&self, remote: Addr, msg: MsgType, seq: u32, ack: u32) {
        let hdr = StreamHeader {
            datagram: DatagramHeader {
                src: Addr { addr: self.rt.transport.local_addr(), port: self.local_port },
                dst: remote,
            },
            msg_type: msg,
            seq,
            ack,
        };
        let packed = hdr.pack();
        if let Err(e) = self.rt.transport.send(remote.addr, &packed) {
            log::warn!("minisocket control send failed: {e}");
        }
    }

    fn send_data(&self, remote: Addr, seq: u32, chunk: &[u8]) {
        let hdr = StreamHeader {
            datagram: DatagramHeader {
                src: Addr { addr: self.rt.transport.local_addr(), port: self.local_port },
                dst: remote,
            },
            msg_type: MsgType::Ack,
            seq,
            ack: 0,
        };
        let mut packet = hdr.pack().to_vec();
        packet.extend_from_slice(chunk);
        if let Err(e) = self.rt.transport.send(remote.addr, &packet) {
            log::warn!("minisocket data send failed: {e}");
        }
    }

    /// Send `data`, fragmenting to the configured MTU, stop-and-wait per fragment.
    pub fn send(self: &Arc<Self>, me: ThreadId, data: &[u8]) -> RuntimeResult<usize> {
        let _guard = self.io_lock.lock(&self.rt, me);
        if self.state() != ConnState::Open {
            return Err(RuntimeError::SendError);
        }
        let remote = self.inner.lock().unwrap().remote.ok_or(RuntimeError::InvalidParams)?;
        let frag_len = self.config.fragment_len().max(1);
        let mut sent = 0;
        for chunk in data.chunks(frag_len) {
            let seq = self.inner.lock().unwrap().send_seq;
            let target_ack = seq.wrapping_add(chunk.len() as u32);
            match self.data_send_wait(me, remote, seq, chunk, target_ack) {
                SendOutcome::Acked => {
                    self.inner.lock().unwrap().send_seq = target_ack;
                    sent += chunk.len();
                }
                SendOutcome::Closed => return Err(RuntimeError::SendError),
                SendOutcome::Exhausted => {
                    return if sent > 0 { Ok(sent) } else { Err(RuntimeError::SendError) };
                }
            }
        }
        Ok(sent)
    }

    fn data_send_wait(
        self: &Arc<Self>,
        me: ThreadId,
        remote: Addr,
        seq: u32,
        chunk: &[u8],
        target_ack: u32,
    ) -> SendOutcome {
        let mut timeout = self.config.retransmit_initial;
        for attempt in 0..=MAX_RETRIES {
            self.send_data(remote, seq, chunk);
            if attempt == MAX_RETRIES {
                break;
            }
            let woken = self.clone();
            let alarm_id = self
                .rt
                .register_alarm(timeout.as_millis() as u64, Box::new(move |rt| woken.wake.v(rt)));
            self.wake.p(&self.rt, me);
            self.rt.deregister_alarm(alarm_id);
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.state, ConnState::Closed | ConnState::Closing) {
                return SendOutcome::Closed;
            }
            if let Some(h) = inner.mailbox.take() {
                if h.msg_type == MsgType::Ack && h.ack == target_ack {
                    return SendOutcome::Acked;
                }
                inner.mailbox = Some(h);
            }
            drop(inner);
            timeout = (timeout * 2).min(self.config.retransmit_cap);
        }
        SendOutcome::Exhausted
    }

    /// Receive up to `max_len` bytes, blocking until at least one byte is available.
    /// Bytes already reassembled beyond `max_len` are kept for the next call rather
    /// than dropped.
    pub fn receive(self: &Arc<Self>, me: ThreadId, max_len: usize) -> RuntimeResult<Vec<u8>> {
        if max_len == 0 {
            return Err(RuntimeError::InvalidParams);
        }
        let _guard = self.io_lock.lock(&self.rt, me);
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.recv_buf.is_empty() {
                    let n = max_len.min(inner.recv_buf.len());
                    return Ok(inner.recv_buf.drain(..n).collect());
                }
                if matches!(inner.state, ConnState::Closed | ConnState::Closing) {
                    return Err(RuntimeError::ReceiveError);
                }
            }
            self.wake.p(&self.rt, me);
        }
    }

    /// Graceful close: if already `CLOSED`, a no-op; if `CLOSING` (the peer already
    /// FINned), re-enter the retransmit path to send our own `FIN`; otherwise send
    /// `FIN` and retransmit with doubling backoff. Either way, resources are released
    /// unconditionally once the retransmit budget is spent, per spec §4.5/§7.
    pub fn close(self: &Arc<Self>, me: ThreadId) {
        let _guard = self.io_lock.lock(&self.rt, me);
        let (state, remote) = {
            let inner = self.inner.lock().unwrap();
            (inner.state, inner.remote)
        };
        if state == ConnState::Closed {
            return;
        }
        self.inner.lock().unwrap().state = ConnState::Closing;
        if let Some(remote) = remote {
            let (seq, ack) = {
                let inner = self.inner.lock().unwrap();
                (inner.send_seq, inner.recv_next)
            };
            let _ = self.handshake_send_wait(me, remote, MsgType::Fin, seq, ack, |hdr| {
                hdr.msg_type == MsgType::Ack
            });
        }
        self.teardown();
    }

    fn teardown(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ConnState::Closed {
            return;
        }
        inner.state = ConnState::Closed;
        drop(inner);
        self.rt.streams.deregister(self.local_port);
        self.rt.ports.destroy_bound(self.local_port);
    }

    /// Called by the demultiplexer for every stream packet addressed to this socket.
    pub fn on_packet(self: &Arc<Self>, rt: &Handle, header: StreamHeader, payload: &[u8]) {
        let src = header.datagram.src;
        match header.msg_type {
            MsgType::Syn => self.on_syn(rt, header, src),
            MsgType::SynAck => self.on_synack(rt, header, src),
            MsgType::Ack => self.on_ack(rt, header, payload, src),
            MsgType::Fin => self.on_fin(rt, header, src),
        }
    }

    fn on_syn(self: &Arc<Self>, rt: &Handle, header: StreamHeader, src: Addr) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ConnState::WaitingSyn => {
                inner.mailbox = Some(header);
                drop(inner);
                self.wake.v(rt);
            }
            ConnState::WaitingAck | ConnState::Open => {
                if inner.remote == Some(src) {
                    // duplicate SYN retransmit mid-handshake or post-open: ignore
                } else {
                    drop(inner);
                    self.send_control(src, MsgType::Fin, 0, 0);
                }
            }
            _ => {}
        }
    }

    fn on_synack(self: &Arc<Self>, rt: &Handle, header: StreamHeader, src: Addr) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ConnState::WaitingSynAck => {
                inner.mailbox = Some(header);
                drop(inner);
                self.wake.v(rt);
            }
            ConnState::Open if inner.remote == Some(src) => {
                drop(inner);
                self.send_control(src, MsgType::Ack, 0, 0);
            }
            _ => {}
        }
    }

    fn on_ack(self: &Arc<Self>, rt: &Handle, header: StreamHeader, payload: &[u8], src: Addr) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ConnState::WaitingAck => {
                if inner.remote == Some(src) {
                    inner.mailbox = Some(header);
                    drop(inner);
                    self.wake.v(rt);
                }
            }
            // The ack of our own FIN during an active close: `close()` moves the
            // socket to `Closing` before it retransmits, so the reply has to be
            // accepted here rather than in the `Open` arm below.
            ConnState::Closing => {
                if inner.remote == Some(src) {
                    inner.mailbox = Some(header);
                    drop(inner);
                    self.wake.v(rt);
                }
            }
            ConnState::Open => {
                if inner.remote != Some(src) {
                    return;
                }
                let mut reply_ack = None;
                if !payload.is_empty() && header.seq == inner.recv_next {
                    inner.recv_next = inner.recv_next.wrapping_add(payload.len() as u32);
                    inner.recv_buf.extend(payload.iter().copied());
                    reply_ack = Some(inner.recv_next);
                }
                inner.mailbox = Some(header);
                drop(inner);
                if let Some(ack) = reply_ack {
                    self.send_control(src, MsgType::Ack, 0, ack);
                }
                self.wake.v(rt);
            }
            _ => {}
        }
    }

    fn on_fin(self: &Arc<Self>, rt: &Handle, header: StreamHeader, src: Addr) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ConnState::Closed => return,
            ConnState::WaitingSyn | ConnState::WaitingSynAck | ConnState::WaitingAck => {
                inner.mailbox = Some(header);
                drop(inner);
                self.wake.v(rt);
                return;
            }
            ConnState::Closing => {
                // peer retransmitted its FIN during our linger: ack it again
                if inner.remote == Some(src) || inner.remote.is_none() {
                    let ack = inner.recv_next;
                    drop(inner);
                    self.send_control(src, MsgType::Ack, 0, ack);
                }
                return;
            }
            ConnState::Open => {}
        }
        if inner.remote != Some(src) {
            return;
        }
        inner.recv_next = inner.recv_next.wrapping_add(1);
        inner.state = ConnState::Closing;
        let ack_value = inner.recv_next;
        drop(inner);
        self.send_control(src, MsgType::Ack, 0, ack_value);
        self.wake.v(rt);
        let linger_ms = self.config.closing_linger.as_millis() as u64;
        let sock = self.clone();
        rt.register_alarm(linger_ms, Box::new(move |_rt| sock.teardown()));
    }
}

/// Outcome of one stop-and-wait data fragment transmission.
enum SendOutcome {
    Acked,
    Closed,
    Exhausted,
}

/// Registry of live stream sockets, keyed by local port, used by the ingress
/// demultiplexer to route `PROTOCOL_STREAM` packets.
pub struct StreamTable {
    sockets: Mutex<HashMap<u16, Arc<StreamSocket>>>,
}

impl StreamTable {
    pub fn new() -> Self {
        StreamTable { sockets: Mutex::new(HashMap::new()) }
    }

    /// Reject an already-occupied port rather than silently stealing it out from
    /// under a live socket — the stream port table has the same `PORTINUSE`
    /// contract as `PortTable::create_unbound`/`create_bound` (spec §4.5/§6).
    fn register(&self, port: u16, sock: Arc<StreamSocket>) -> RuntimeResult<()> {
        let mut table = self.sockets.lock().unwrap();
        if table.contains_key(&port) {
            return Err(RuntimeError::PortInUse);
        }
        table.insert(port, sock);
        Ok(())
    }

    fn deregister(&self, port: u16) {
        self.sockets.lock().unwrap().remove(&port);
    }

    pub fn deliver(&self, rt: &Handle, header: StreamHeader, payload: &[u8]) {
        let sock = self.sockets.lock().unwrap().get(&header.datagram.dst.port).cloned();
        match sock {
            Some(sock) => sock.on_packet(rt, header, payload),
            None => {
                log::debug!("stream packet for unknown port {} dropped", header.datagram.dst.port)
            }
        }
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::UdpTransport;
    use crate::task::scheduler::Runtime;

    fn test_runtime() -> Handle {
        let transport = Arc::new(UdpTransport::bind_loopback(0).expect("bind loopback"));
        Runtime::with_config(transport, RuntimeConfig::fast_for_tests())
    }

    #[test]
    fn handshake_then_single_byte_round_trip() {
        let server_rt = test_runtime();
        let client_rt = test_runtime();
        let server_port = 80u16;
        let server_addr = Addr { addr: server_rt.transport.local_addr(), port: server_port };

        let server_done = Arc::new(std::sync::Mutex::new(None));
        let sd = server_done.clone();
        server_rt.fork(
            "server",
            Box::new(move |h| {
                let me = h.self_id();
                let sock = StreamSocket::listen(&h, me, server_port).expect("listen");
                let data = sock.receive(me, 16).expect("receive");
                *sd.lock().unwrap() = Some(data);
            }),
        );
        std::thread::sleep(std::time::Duration::from_millis(20));

        let client_done = Arc::new(std::sync::Mutex::new(false));
        let cd = client_done.clone();
        client_rt.fork(
            "client",
            Box::new(move |h| {
                let me = h.self_id();
                let sock = StreamSocket::connect(&h, me, server_addr).expect("connect");
                sock.send(me, b"x").expect("send");
                *cd.lock().unwrap() = true;
            }),
        );

        client_rt.join_idle();
        server_rt.join_idle();
        assert!(*client_done.lock().unwrap());
        assert_eq!(server_done.lock().unwrap().as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn connect_without_server_returns_no_server() {
        let rt = test_runtime();
        let unreachable = Addr { addr: rt.transport.local_addr().wrapping_add(12345), port: 9 };
        let result = Arc::new(std::sync::Mutex::new(None));
        let r = result.clone();
        rt.fork(
            "client",
            Box::new(move |h| {
                let me = h.self_id();
                *r.lock().unwrap() = Some(StreamSocket::connect(&h, me, unreachable).err());
            }),
        );
        rt.join_idle();
        assert_eq!(*result.lock().unwrap(), Some(Some(RuntimeError::NoServer)));
    }
}

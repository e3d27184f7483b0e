//! Ingress demultiplexer: the spec's `network_interrupt` handler, made concrete.
//!
//! Grounded on `examples/original_source/P1-P4/minimsg.c`'s network-handler packet
//! dispatch (protocol-byte switch over datagram vs. stream headers) and the
//! teacher's `net/mod.rs` coordinator that wires a received-frame callback to the
//! right per-protocol handler. Installed once, at `Runtime::new`, as the
//! [`crate::net::transport::RawTransport`] ingress callback.

use crate::net::header::{
    peek_protocol, DatagramHeader, StreamHeader, DATAGRAM_HEADER_LEN, PROTOCOL_DATAGRAM,
    PROTOCOL_STREAM, STREAM_HEADER_LEN,
};
use crate::task::scheduler::Runtime;
use std::sync::Weak;

/// Register the demultiplexer as `rt`'s transport's ingress callback. Takes a weak
/// reference so the callback does not keep the runtime alive past its last `Handle` —
/// a dropped runtime simply stops having its packets looked at.
pub(crate) fn install(rt: &crate::Handle) {
    let weak: Weak<Runtime> = std::sync::Arc::downgrade(rt);
    rt.transport.set_ingress(Box::new(move |buf: &[u8]| {
        if let Some(rt) = weak.upgrade() {
            dispatch(&rt, buf);
        }
    }));
}

/// Spec §4.4: "if size < datagram_header_size, drop; else switch on the protocol byte
/// to the datagram or stream handler." Malformed or unroutable packets are dropped
/// silently (logged, never propagated) — the ingress handler never returns an error,
/// per spec §7: inputs come from an untrusted network.
fn dispatch(rt: &crate::Handle, buf: &[u8]) {
    if buf.len() < DATAGRAM_HEADER_LEN {
        log::trace!("dropped runt packet ({} bytes)", buf.len());
        return;
    }
    let protocol = match peek_protocol(buf) {
        Ok(p) => p,
        Err(_) => {
            log::warn!("dropped packet with unreadable protocol byte");
            return;
        }
    };
    match protocol {
        PROTOCOL_DATAGRAM => match DatagramHeader::unpack(buf) {
            Ok(hdr) => {
                let payload = buf[DATAGRAM_HEADER_LEN..].to_vec();
                #[cfg(feature = "debug_verbose")]
                log::trace!("datagram {} bytes -> port {}", payload.len(), hdr.dst.port);
                rt.ports.deliver(rt, hdr.dst.port, hdr.src, payload);
            }
            Err(_) => log::warn!("dropped malformed datagram header"),
        },
        PROTOCOL_STREAM => {
            if buf.len() < STREAM_HEADER_LEN {
                log::warn!("dropped runt stream packet ({} bytes)", buf.len());
                return;
            }
            match StreamHeader::unpack(buf) {
                Ok(hdr) => {
                    let payload = &buf[STREAM_HEADER_LEN..];
                    #[cfg(feature = "debug_verbose")]
                    log::trace!(
                        "stream {:?} {} bytes -> port {}",
                        hdr.msg_type,
                        payload.len(),
                        hdr.datagram.dst.port
                    );
                    rt.streams.deliver(rt, hdr, payload);
                }
                Err(_) => log::warn!("dropped malformed stream header"),
            }
        }
        other => log::warn!("dropped packet with unknown protocol byte {other}"),
    }
}

//! Demo: two `Runtime`s in one OS process, talking both transports over loopback UDP.
//!
//! A server minithread listens on stream port 80 and echoes whatever it receives
//! back to the client (scenario 1/4 of the spec's end-to-end list: handshake then a
//! single-fragment send/receive round trip). Once the stream exchange settles, both
//! sides also trade one datagram each over a throwaway unbound/bound pair, exercising
//! `net::port` the same way the stream test exercises `net::stream`.

use miniruntime::net::header::Addr;
use miniruntime::net::stream::StreamSocket;
use miniruntime::net::transport::UdpTransport;
use miniruntime::Runtime;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();

    let server_transport = Arc::new(UdpTransport::bind_loopback(0).expect("bind server transport"));
    let client_transport = Arc::new(UdpTransport::bind_loopback(0).expect("bind client transport"));
    let server_addr = server_transport.local_addr();

    let server_rt = Runtime::new(server_transport);
    let client_rt = Runtime::new(client_transport);

    const STREAM_PORT: u16 = 80;
    const DATAGRAM_PORT: u16 = 7000;

    server_rt.fork(
        "echo-server",
        Box::new(move |rt| {
            let me = rt.self_id();
            log::info!("server: listening on stream port {STREAM_PORT}");
            let sock = StreamSocket::listen(&rt, me, STREAM_PORT).expect("listen");
            let msg = sock.receive(me, 64).expect("receive");
            log::info!("server: received {:?}", String::from_utf8_lossy(&msg));
            sock.send(me, &msg).expect("echo back");
            sock.close(me);

            let local = rt.ports().create_unbound(DATAGRAM_PORT).expect("create_unbound");
            let (reply_to, payload) = rt.ports().receive(&rt, &local, me).expect("receive");
            log::info!("server: datagram {:?}", String::from_utf8_lossy(&payload));
            rt.ports().send(&rt, &local, &reply_to, &payload).expect("datagram echo");
        }),
    );

    std::thread::sleep(Duration::from_millis(50));

    let remote = Addr { addr: server_addr, port: STREAM_PORT };
    client_rt.fork(
        "pingpong-client",
        Box::new(move |rt| {
            let me = rt.self_id();
            log::info!("client: connecting to {remote:?}");
            let sock = StreamSocket::connect(&rt, me, remote).expect("connect");
            sock.send(me, b"ping").expect("send");
            let reply = sock.receive(me, 64).expect("receive reply");
            log::info!("client: server replied {:?}", String::from_utf8_lossy(&reply));
            assert_eq!(&reply, b"ping");
            sock.close(me);

            let local = rt.ports().create_unbound(DATAGRAM_PORT + 1).expect("create_unbound");
            let remote_unbound = Addr { addr: server_addr, port: DATAGRAM_PORT };
            let dst = rt.ports().create_bound(remote_unbound).expect("create_bound");
            rt.ports().send(&rt, &local, &dst, b"pong").expect("datagram send");
            let (_reply_to, echoed) = rt.ports().receive(&rt, &local, me).expect("receive echo");
            log::info!("client: datagram echoed back {:?}", String::from_utf8_lossy(&echoed));
        }),
    );

    client_rt.join_idle();
    server_rt.join_idle();
    client_rt.shutdown_clock();
    server_rt.shutdown_clock();
}

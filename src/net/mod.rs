//! Wire formats, the raw transport seam, datagram miniports, the reliable stream
//! socket, and the ingress demultiplexer that routes between the latter two.

pub mod demux;
pub mod header;
pub mod port;
pub mod stream;
pub mod transport;

//! Network side: sockets, framing and the background receive loops.

pub mod receiver;
pub mod transport;

pub use receiver::{PacketHandler, RECV_POLL_INTERVAL};
pub use transport::Transport;

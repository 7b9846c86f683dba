use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::codec;
use crate::dump::{Direction, Dumper};
use crate::packet::Packet;

/// How long a UDP receive blocks before re-checking the stop flag.
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Called for every successfully decoded inbound packet.
pub type PacketHandler = Arc<dyn Fn(Packet, SocketAddr, SystemTime) + Send + Sync>;

/// State shared by every receive loop.
pub(crate) struct ReceiveContext {
    pub stop: Arc<AtomicBool>,
    pub max_packet_size: usize,
    pub dumper: Arc<Dumper>,
    pub handler: PacketHandler,
}

impl ReceiveContext {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Decode and hand over one packet. Malformed input is logged and dropped.
    fn deliver(&self, bytes: &[u8], peer: SocketAddr, received_at: SystemTime) {
        match codec::decode(bytes) {
            Ok(packet) => {
                self.dumper.dump(Direction::Incoming, peer, &packet, bytes);
                (self.handler)(packet, peer, received_at);
            }
            Err(err) => {
                warn!("dropping {} bytes from {}: {}", bytes.len(), peer, err);
            }
        }
    }
}

/// Spawn a thread that receives datagrams on `socket` until the stop flag is set.
pub(crate) fn spawn_udp_receiver(socket: UdpSocket, ctx: ReceiveContext) -> io::Result<JoinHandle<()>> {
    // Short timeout so the stop flag is seen promptly
    socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

    thread::Builder::new()
        .name("osc-udp-receiver".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; ctx.max_packet_size];
            debug!("udp receiver started on {:?}", socket.local_addr());

            while !ctx.stopped() {
                match socket.recv_from(&mut buf) {
                    Ok((size, peer)) => {
                        ctx.deliver(&buf[..size], peer, SystemTime::now());
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    // ICMP port unreachable from an earlier send surfaces here on some platforms
                    Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                    Err(err) => {
                        if ctx.stopped() {
                            break;
                        }
                        warn!("udp receive error: {}", err);
                        thread::sleep(RECV_ERROR_BACKOFF);
                    }
                }
            }

            debug!("udp receiver exiting");
        })
}

/// Spawn a thread that reads length-prefixed packets from `stream` until the
/// connection closes or is shut down.
pub(crate) fn spawn_tcp_receiver(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: ReceiveContext,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("osc-tcp-receiver".to_string())
        .spawn(move || {
            debug!("tcp receiver started for {}", peer);
            loop {
                match codec::read_frame(&mut stream, ctx.max_packet_size) {
                    Ok(Some(bytes)) => ctx.deliver(&bytes, peer, SystemTime::now()),
                    Ok(None) => {
                        if !ctx.stopped() {
                            info!("connection closed by {}", peer);
                        }
                        break;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::InvalidData => {
                        warn!("dropping frame from {}: {}", peer, e);
                    }
                    Err(err) => {
                        if !ctx.stopped() {
                            warn!("tcp receive error from {}: {}", peer, err);
                        }
                        break;
                    }
                }
            }
            debug!("tcp receiver exiting");
        })
}

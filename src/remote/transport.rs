use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::receiver::{spawn_tcp_receiver, spawn_udp_receiver, PacketHandler, ReceiveContext};
use crate::codec;
use crate::config::Protocol;
use crate::dump::{Direction, Dumper};
use crate::error::{Error, Result};
use crate::packet::Packet;

enum Link {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// An open socket to one target plus the thread receiving on it.
///
/// Dropping the transport closes it.
pub struct Transport {
    link: Link,
    target: SocketAddr,
    local_addr: SocketAddr,
    max_packet_size: usize,
    dumper: Arc<Dumper>,
    stop: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl Transport {
    /// Bind (and for TCP, connect) to `target` and start receiving.
    ///
    /// `local_port` 0 binds an ephemeral port. TCP connections always use an
    /// ephemeral local port.
    pub fn open(
        target: SocketAddr,
        protocol: Protocol,
        local_port: u16,
        max_packet_size: usize,
        dumper: Arc<Dumper>,
        handler: PacketHandler,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = ReceiveContext {
            stop: stop.clone(),
            max_packet_size,
            dumper: dumper.clone(),
            handler,
        };

        let (link, local_addr, receiver) = match protocol {
            Protocol::Udp => {
                let socket = UdpSocket::bind(udp_bind_addr(target, local_port))?;
                let local_addr = socket.local_addr()?;
                let receiver = spawn_udp_receiver(socket.try_clone()?, ctx)?;
                (Link::Udp(socket), local_addr, receiver)
            }
            Protocol::Tcp => {
                if local_port != 0 {
                    warn!("local port {} ignored for tcp, using an ephemeral port", local_port);
                }
                let stream = TcpStream::connect(target)?;
                stream.set_nodelay(true)?;
                let local_addr = stream.local_addr()?;
                let receiver = spawn_tcp_receiver(stream.try_clone()?, target, ctx)?;
                (Link::Tcp(stream), local_addr, receiver)
            }
        };

        info!("{} transport {} -> {}", protocol, local_addr, target);
        Ok(Self {
            link,
            target,
            local_addr,
            max_packet_size,
            dumper,
            stop,
            receiver: Some(receiver),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn protocol(&self) -> Protocol {
        match self.link {
            Link::Udp(_) => Protocol::Udp,
            Link::Tcp(_) => Protocol::Tcp,
        }
    }

    /// False once closed, or once the receive loop has ended because the
    /// peer closed the stream.
    pub fn is_open(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| !receiver.is_finished())
    }

    /// Encode and send one packet.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = codec::encode(packet)?;
        self.send_bytes(&bytes)?;
        self.dumper.dump(Direction::Outgoing, self.target, packet, &bytes);
        Ok(())
    }

    /// Send one already encoded packet: a single datagram over UDP, a
    /// length-prefixed frame over TCP.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::SendFailed(io::ErrorKind::NotConnected.into()));
        }
        match &mut self.link {
            Link::Udp(socket) => {
                if bytes.len() > self.max_packet_size {
                    return Err(Error::PacketTooLarge {
                        size: bytes.len(),
                        limit: self.max_packet_size,
                    });
                }
                socket.send_to(bytes, self.target).map_err(Error::SendFailed)?;
            }
            Link::Tcp(stream) => {
                stream.write_all(&codec::frame(bytes)).map_err(Error::SendFailed)?;
            }
        }
        Ok(())
    }

    /// Stop the receive loop and release the socket. Safe to call twice.
    pub fn close(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if let Link::Tcp(stream) = &self.link {
            // Unblocks the reader immediately
            let _ = stream.shutdown(Shutdown::Both);
        }
        if receiver.thread().id() != thread::current().id() {
            let _ = receiver.join();
        }
        debug!("transport {} -> {} closed", self.local_addr, self.target);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Loopback targets get a loopback socket of the same family, everything
/// else binds the unspecified address.
fn udp_bind_addr(target: SocketAddr, local_port: u16) -> SocketAddr {
    let ip: IpAddr = match (target, target.ip().is_loopback()) {
        (SocketAddr::V4(_), true) => Ipv4Addr::LOCALHOST.into(),
        (SocketAddr::V4(_), false) => Ipv4Addr::UNSPECIFIED.into(),
        (SocketAddr::V6(_), true) => Ipv6Addr::LOCALHOST.into(),
        (SocketAddr::V6(_), false) => Ipv6Addr::UNSPECIFIED.into(),
    };
    SocketAddr::new(ip, local_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::DumpMode;
    use crate::packet::Message;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Duration;

    fn quiet_dumper() -> Arc<Dumper> {
        Arc::new(Dumper::new(DumpMode::Off, DumpMode::Off))
    }

    fn ignore() -> PacketHandler {
        Arc::new(|_, _, _| {})
    }

    #[test]
    fn loopback_targets_bind_loopback() {
        let v4: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(udp_bind_addr(v4, 0), "127.0.0.1:0".parse().unwrap());
        let remote: SocketAddr = "192.168.1.20:9000".parse().unwrap();
        assert_eq!(udp_bind_addr(remote, 5000), "0.0.0.0:5000".parse().unwrap());
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(udp_bind_addr(v6, 0), "[::1]:0".parse().unwrap());
    }

    #[test]
    fn udp_send_and_receive() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let (tx, rx) = mpsc::channel();
        let handler: PacketHandler = Arc::new(move |packet, sender, _| {
            let _ = tx.send((packet, sender));
        });
        let mut transport = Transport::open(
            peer.local_addr().unwrap(),
            Protocol::Udp,
            0,
            8192,
            quiet_dumper(),
            handler,
        )
        .unwrap();
        assert_ne!(transport.local_addr().port(), 0);

        let msg = Packet::Message(Message::new("/ping", vec![1.into()]));
        transport.send(&msg).unwrap();

        let mut buf = [0u8; 1024];
        let (size, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(from, transport.local_addr());
        assert_eq!(codec::decode(&buf[..size]).unwrap(), msg);

        let reply = Packet::Message(Message::new("/pong", vec![]));
        peer.send_to(&codec::encode(&reply).unwrap(), from).unwrap();
        let (received, sender) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, reply);
        assert_eq!(sender, peer.local_addr().unwrap());

        transport.close();
        transport.close();
        assert!(matches!(transport.send(&msg), Err(Error::SendFailed(_))));
    }

    #[test]
    fn oversized_datagram_is_refused() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut transport = Transport::open(
            peer.local_addr().unwrap(),
            Protocol::Udp,
            0,
            64,
            quiet_dumper(),
            ignore(),
        )
        .unwrap();
        let result = transport.send_bytes(&[0u8; 128]);
        assert!(matches!(
            result,
            Err(Error::PacketTooLarge { size: 128, limit: 64 })
        ));
    }

    #[test]
    fn malformed_datagrams_do_not_stop_the_loop() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let (tx, rx) = mpsc::channel();
        let handler: PacketHandler = Arc::new(move |packet, _, _| {
            let _ = tx.send(packet);
        });
        let transport = Transport::open(
            peer.local_addr().unwrap(),
            Protocol::Udp,
            0,
            8192,
            quiet_dumper(),
            handler,
        )
        .unwrap();

        peer.send_to(b"garbage", transport.local_addr()).unwrap();
        let good = Packet::Message(Message::new("/ok", vec![]));
        peer.send_to(&codec::encode(&good).unwrap(), transport.local_addr())
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), good);
    }

    #[test]
    fn tcp_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();
        let handler: PacketHandler = Arc::new(move |packet, _, _| {
            let _ = tx.send(packet);
        });
        let mut transport =
            Transport::open(target, Protocol::Tcp, 0, 8192, quiet_dumper(), handler).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let msg = Packet::Message(Message::new("/tcp", vec!["framed".into()]));
        transport.send(&msg).unwrap();
        let bytes = codec::read_frame(&mut server, 8192).unwrap().unwrap();
        assert_eq!(codec::decode(&bytes).unwrap(), msg);

        let reply = Packet::Message(Message::new("/back", vec![2.into()]));
        server
            .write_all(&codec::frame(&codec::encode(&reply).unwrap()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), reply);

        // Shutting down unblocks the reader right away
        transport.close();
    }
}

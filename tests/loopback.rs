//! Session tests against real sockets on the loopback interface.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use osc_client::codec;
use osc_client::{
    Argument, Bundle, DumpMode, DumpSink, Error, Message, Packet, Protocol, Session, SessionState,
    TimeTag,
};

const WAIT: Duration = Duration::from_secs(2);

fn peer() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(WAIT)).unwrap();
    socket
}

fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0u8; 8192];
    let (size, from) = socket.recv_from(&mut buf).unwrap();
    (codec::decode(&buf[..size]).unwrap(), from)
}

type Received = (Message, SocketAddr, SystemTime);

fn listen(session: &mut Session) -> mpsc::Receiver<Received> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    session.add_listener(move |msg, sender, when| {
        let _ = tx.lock().unwrap().send((msg.clone(), sender, when));
    });
    rx
}

#[test]
fn message_reaches_peer_with_types_intact() {
    let peer = peer();
    let mut session = Session::new(Protocol::Udp, 0);

    let msg = Message::new("/test", vec![1.into(), 2.5f32.into(), "hi".into()]);
    assert!(matches!(session.send(msg.clone()), Err(Error::NoTarget)));

    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());
    session.send(msg).unwrap();

    let (packet, from) = recv_packet(&peer);
    let Packet::Message(received) = packet else {
        panic!("expected a message, got {:?}", packet);
    };
    assert_eq!(received.name(), "/test");
    assert_eq!(
        received.args(),
        &[
            Argument::Int(1),
            Argument::Float(2.5),
            Argument::String("hi".to_string())
        ]
    );
    assert_eq!(Some(from), session.local_addr());
}

#[test]
fn replies_reach_listeners() {
    let peer = peer();
    let mut session = Session::new(Protocol::Udp, 0);
    let rx = listen(&mut session);
    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());
    session.send(Message::new("/hello", vec![])).unwrap();
    let (_, session_addr) = recv_packet(&peer);

    let before = SystemTime::now();
    let reply = Packet::Message(Message::new("/reply", vec![42.into()]));
    peer.send_to(&codec::encode(&reply).unwrap(), session_addr)
        .unwrap();

    let (msg, sender, when) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(msg, Message::new("/reply", vec![42.into()]));
    assert_eq!(sender, peer.local_addr().unwrap());
    assert!(when >= before);
}

#[test]
fn bundle_contents_are_flattened_with_bundle_time() {
    let peer = peer();
    let mut session = Session::new(Protocol::Udp, 0);
    let rx = listen(&mut session);
    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());
    session.connect().unwrap();
    let session_addr = session.local_addr().unwrap();

    let later = SystemTime::now() + Duration::from_secs(60);
    let tag = TimeTag::from_system_time(later);
    let bundle = Packet::Bundle(Bundle::with_elements(
        tag,
        vec![
            Message::new("/first", vec![]).into(),
            Bundle::with_elements(
                TimeTag::IMMEDIATE,
                vec![Message::new("/nested", vec![]).into()],
            )
            .into(),
        ],
    ));
    peer.send_to(&codec::encode(&bundle).unwrap(), session_addr)
        .unwrap();

    let (first, _, first_when) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(first.name(), "/first");
    assert_eq!(Some(first_when), tag.to_system_time());

    let (nested, _, nested_when) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(nested.name(), "/nested");
    // Immediate bundles report the arrival time instead
    assert!(nested_when < later);
}

#[test]
fn closed_bundle_travels_as_one_packet() {
    let peer = peer();
    let mut session = Session::new(Protocol::Udp, 0);
    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());

    let tag = session.open_bundle(Some(50)).unwrap();
    session.post(Message::new("/a", vec![1.into()])).unwrap();
    session
        .add_to_open_bundle(Bundle::with_elements(
            TimeTag::IMMEDIATE,
            vec![Message::new("/b", vec![]).into()],
        ))
        .unwrap();
    session.close_bundle().unwrap();

    let (packet, _) = recv_packet(&peer);
    let expected = Packet::Bundle(Bundle::with_elements(
        tag,
        vec![
            Message::new("/a", vec![1.into()]).into(),
            Bundle::with_elements(
                TimeTag::IMMEDIATE,
                vec![Message::new("/b", vec![]).into()],
            )
            .into(),
        ],
    ));
    assert_eq!(packet, expected);
}

#[test]
fn malformed_datagram_is_dropped_and_listening_continues() {
    let peer = peer();
    let mut session = Session::new(Protocol::Udp, 0);
    let rx = listen(&mut session);
    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());
    session.connect().unwrap();
    let session_addr = session.local_addr().unwrap();

    let mut truncated = Vec::new();
    truncated.extend_from_slice(b"/t\0\0,ii\0");
    truncated.extend_from_slice(&1i32.to_be_bytes());
    peer.send_to(&truncated, session_addr).unwrap();

    let good = Packet::Message(Message::new("/still/here", vec![]));
    peer.send_to(&codec::encode(&good).unwrap(), session_addr)
        .unwrap();

    let (msg, _, _) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(msg.name(), "/still/here");
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn outgoing_dump_traces_sent_packets() {
    let peer = peer();
    let captured = Captured::default();
    let mut session = Session::new(Protocol::Udp, 0);
    session.set_dump_sink(DumpSink::Writer(Box::new(captured.clone())));
    session.set_dump_mode(DumpMode::Off, DumpMode::Text);
    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());

    session.send(Message::new("/dumped", vec![3.into()])).unwrap();
    recv_packet(&peer);

    let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert_eq!(
        text,
        format!("[out {}] [ \"/dumped\", 3 ]\n", peer.local_addr().unwrap())
    );
}

#[test]
fn tcp_session_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut session = Session::new(Protocol::Tcp, 0);
    let rx = listen(&mut session);
    session.set_target("127.0.0.1", listener.local_addr().unwrap().port());

    session.send(Message::new("/over/tcp", vec![7i64.into()])).unwrap();
    let (mut server, _) = listener.accept().unwrap();
    server.set_read_timeout(Some(WAIT)).unwrap();
    let frame = codec::read_frame(&mut server, 8192).unwrap().unwrap();
    assert_eq!(
        codec::decode(&frame).unwrap(),
        Packet::Message(Message::new("/over/tcp", vec![7i64.into()]))
    );

    let reply = Packet::Message(Message::new("/ack", vec![true.into()]));
    server
        .write_all(&codec::frame(&codec::encode(&reply).unwrap()))
        .unwrap();
    let (msg, sender, _) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(msg, Message::new("/ack", vec![true.into()]));
    assert_eq!(sender, listener.local_addr().unwrap());
}

#[test]
fn tcp_session_reconnects_after_peer_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut session = Session::new(Protocol::Tcp, 0);
    session.set_target("127.0.0.1", listener.local_addr().unwrap().port());

    session.send(Message::new("/first", vec![])).unwrap();
    let (mut server, _) = listener.accept().unwrap();
    server.set_read_timeout(Some(WAIT)).unwrap();
    let frame = codec::read_frame(&mut server, 8192).unwrap().unwrap();
    assert_eq!(
        codec::decode(&frame).unwrap(),
        Packet::Message(Message::new("/first", vec![]))
    );
    drop(server);

    let deadline = Instant::now() + WAIT;
    while session.state() == SessionState::Connected {
        assert!(Instant::now() < deadline, "closed stream never noticed");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(session.state(), SessionState::TargetSet);

    session.send(Message::new("/second", vec![2.into()])).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    let (mut server, _) = listener.accept().unwrap();
    server.set_read_timeout(Some(WAIT)).unwrap();
    let frame = codec::read_frame(&mut server, 8192).unwrap().unwrap();
    assert_eq!(
        codec::decode(&frame).unwrap(),
        Packet::Message(Message::new("/second", vec![2.into()]))
    );
}

#[test]
fn disconnect_returns_promptly() {
    let peer = peer();
    let mut session = Session::new(Protocol::Udp, 0);
    session.set_target("127.0.0.1", peer.local_addr().unwrap().port());
    session.connect().unwrap();

    let started = Instant::now();
    session.disconnect();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(session.local_addr().is_none());
}

#[test]
fn retarget_moves_traffic_to_new_peer() {
    let first = peer();
    let second = peer();
    let mut session = Session::new(Protocol::Udp, 0);

    session.set_target("127.0.0.1", first.local_addr().unwrap().port());
    session.send(Message::new("/one", vec![])).unwrap();
    let (packet, _) = recv_packet(&first);
    assert_eq!(packet, Packet::Message(Message::new("/one", vec![])));

    session.set_target("127.0.0.1", second.local_addr().unwrap().port());
    session.send(Message::new("/two", vec![])).unwrap();
    let (packet, _) = recv_packet(&second);
    assert_eq!(packet, Packet::Message(Message::new("/two", vec![])));
}

//! The client session: target configuration, lazy connection, the single
//! open bundle, frozen bundle time and inbound listeners.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::config::{Config, Protocol, DEFAULT_MAX_PACKET_SIZE};
use crate::dump::{DumpMode, DumpSink, Dumper};
use crate::error::{Error, Result};
use crate::packet::{Bundle, Message, Packet, TimeTag};
use crate::remote::{PacketHandler, Transport};

/// Receives every inbound message with its sender and time.
///
/// The time is the enclosing bundle's time tag when it is not immediate,
/// otherwise the moment the packet arrived.
pub type Listener = Arc<dyn Fn(&Message, SocketAddr, SystemTime) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

/// Host and port outgoing packets are sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No target configured.
    Disconnected,
    /// Target known, no live transport.
    TargetSet,
    /// Transport open and receiving.
    Connected,
}

enum Connection {
    Disconnected,
    TargetSet(Target),
    Connected { target: Target, transport: Transport },
}

pub struct Session {
    connection: Connection,
    protocol: Protocol,
    local_port: u16,
    max_packet_size: usize,
    open_bundle: Option<Bundle>,
    frozen_at: Option<SystemTime>,
    dumper: Arc<Dumper>,
    listeners: Arc<Mutex<Listeners>>,
}

impl Session {
    pub fn new(protocol: Protocol, local_port: u16) -> Self {
        Self {
            connection: Connection::Disconnected,
            protocol,
            local_port,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            open_bundle: None,
            frozen_at: None,
            dumper: Arc::new(Dumper::new(DumpMode::Off, DumpMode::Off)),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut session = Self::new(config.protocol, config.local_port);
        session.max_packet_size = config.max_packet_size;
        session.set_dump_mode(config.dump.incoming, config.dump.outgoing);
        if let Some(target) = &config.target {
            session.set_target(&target.host, target.port);
        }
        session
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// A transport the peer has closed counts as `TargetSet`: the next send
    /// reconnects.
    pub fn state(&self) -> SessionState {
        match &self.connection {
            Connection::Disconnected => SessionState::Disconnected,
            Connection::TargetSet(_) => SessionState::TargetSet,
            Connection::Connected { transport, .. } if !transport.is_open() => {
                SessionState::TargetSet
            }
            Connection::Connected { .. } => SessionState::Connected,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match &self.connection {
            Connection::Disconnected => None,
            Connection::TargetSet(target) => Some(target),
            Connection::Connected { target, .. } => Some(target),
        }
    }

    /// Point the session at a new target. A live transport is closed first
    /// and reopened lazily on the next send.
    pub fn set_target(&mut self, host: &str, port: u16) {
        self.close_transport();
        let target = Target {
            host: host.to_string(),
            port,
        };
        debug!("target set to {}", target);
        self.connection = Connection::TargetSet(target);
    }

    /// Close the transport and forget the target.
    pub fn disconnect(&mut self) {
        self.close_transport();
        self.connection = Connection::Disconnected;
    }

    /// The bound local port while connected, otherwise the configured one.
    pub fn local_port(&self) -> u16 {
        self.local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.local_port)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.connection {
            Connection::Connected { transport, .. } => Some(transport.local_addr()),
            _ => None,
        }
    }

    /// Open the transport now instead of on the first send.
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_connected().map(|_| ())
    }

    /// Send a packet right away, connecting first if needed.
    ///
    /// A failed write drops the transport so the next send reconnects.
    pub fn send(&mut self, packet: impl Into<Packet>) -> Result<()> {
        let packet = packet.into();
        let result = self.ensure_connected()?.send(&packet);
        if let Err(Error::SendFailed(err)) = &result {
            warn!("send failed, dropping connection: {}", err);
            self.close_transport();
        }
        result
    }

    /// Add `message` to the open bundle if there is one, otherwise send it.
    pub fn post(&mut self, message: Message) -> Result<()> {
        if let Some(bundle) = self.open_bundle.as_mut() {
            bundle.push(message.into());
            return Ok(());
        }
        self.send(message)
    }

    /// Start a bundle dispatched `delay_ms` after the reference time (the
    /// frozen time, or now). Returns the assigned time tag.
    pub fn open_bundle(&mut self, delay_ms: Option<i64>) -> Result<TimeTag> {
        if self.open_bundle.is_some() {
            return Err(Error::BundleAlreadyOpen);
        }
        let time_tag = self.bundle_time(delay_ms.unwrap_or(0));
        self.open_bundle = Some(Bundle::new(time_tag));
        Ok(time_tag)
    }

    /// Start a bundle with an explicit time tag.
    pub fn open_bundle_at(&mut self, time_tag: TimeTag) -> Result<()> {
        if self.open_bundle.is_some() {
            return Err(Error::BundleAlreadyOpen);
        }
        self.open_bundle = Some(Bundle::new(time_tag));
        Ok(())
    }

    pub fn add_to_open_bundle(&mut self, packet: impl Into<Packet>) -> Result<()> {
        match &mut self.open_bundle {
            Some(bundle) => {
                bundle.push(packet.into());
                Ok(())
            }
            None => Err(Error::NoBundleOpen),
        }
    }

    /// The bundle under construction, if any.
    pub fn pending_bundle(&self) -> Option<&Bundle> {
        self.open_bundle.as_ref()
    }

    /// Send the open bundle as one packet. The slot is cleared even when
    /// sending fails.
    pub fn close_bundle(&mut self) -> Result<()> {
        let bundle = self.open_bundle.take().ok_or(Error::NoBundleOpen)?;
        self.send(bundle)
    }

    /// Capture the current time as the reference for subsequent bundles.
    pub fn freeze_time(&mut self) {
        self.frozen_at = Some(SystemTime::now());
    }

    pub fn unfreeze_time(&mut self) {
        self.frozen_at = None;
    }

    pub fn is_time_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn set_dump_mode(&mut self, incoming: DumpMode, outgoing: DumpMode) {
        self.dumper.set_modes(incoming, outgoing);
    }

    pub fn dump_modes(&self) -> (DumpMode, DumpMode) {
        self.dumper.modes()
    }

    pub fn set_dump_sink(&mut self, sink: DumpSink) {
        self.dumper.set_sink(sink);
    }

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&Message, SocketAddr, SystemTime) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Returns whether a listener was registered under `id`.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    fn bundle_time(&self, delay_ms: i64) -> TimeTag {
        let reference = self.frozen_at.unwrap_or_else(SystemTime::now);
        let delay = Duration::from_millis(delay_ms.unsigned_abs());
        let time = if delay_ms >= 0 {
            reference.checked_add(delay)
        } else {
            reference.checked_sub(delay)
        };
        time.and_then(TimeTag::checked_from_system_time)
            .unwrap_or_else(|| TimeTag::from_system_time(reference))
    }

    fn ensure_connected(&mut self) -> Result<&mut Transport> {
        if let Connection::Connected { target, transport } = &self.connection {
            if !transport.is_open() {
                debug!("connection to {} was closed by the peer", target);
                self.close_transport();
            }
        }
        if let Connection::TargetSet(target) = &self.connection {
            let target = target.clone();
            let transport = self.open_transport(&target)?;
            self.connection = Connection::Connected { target, transport };
        }
        match &mut self.connection {
            Connection::Connected { transport, .. } => Ok(transport),
            _ => Err(Error::NoTarget),
        }
    }

    fn open_transport(&self, target: &Target) -> Result<Transport> {
        let connect_failed = |source: io::Error| Error::ConnectFailed {
            target: target.to_string(),
            source,
        };
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| {
                connect_failed(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no address",
                ))
            })?;
        Transport::open(
            addr,
            self.protocol,
            self.local_port,
            self.max_packet_size,
            self.dumper.clone(),
            self.packet_handler(),
        )
        .map_err(connect_failed)
    }

    fn packet_handler(&self) -> PacketHandler {
        let listeners = self.listeners.clone();
        Arc::new(move |packet: Packet, sender: SocketAddr, received_at: SystemTime| {
            // Snapshot so listeners run without the registry lock held
            let snapshot: Vec<Listener> = listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            for (message, time_tag) in packet.flatten() {
                let when = time_tag
                    .and_then(TimeTag::to_system_time)
                    .unwrap_or(received_at);
                for listener in &snapshot {
                    listener(message, sender, when);
                }
            }
        })
    }

    fn close_transport(&mut self) {
        let connection = std::mem::replace(&mut self.connection, Connection::Disconnected);
        self.connection = match connection {
            Connection::Connected {
                target,
                mut transport,
            } => {
                transport.close();
                info!("disconnected from {}", target);
                Connection::TargetSet(target)
            }
            other => other,
        };
    }
}

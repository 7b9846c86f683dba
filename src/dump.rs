//! Human-readable traces of sent and received packets.
//!
//! Dumping is independent of logging: traces go to a dedicated sink (the
//! console by default) and each direction has its own [`DumpMode`].

use std::fmt::Write as _;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::error::Error;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpMode {
    #[default]
    Off,
    Text,
    Hex,
    Both,
}

impl DumpMode {
    pub fn code(self) -> u8 {
        match self {
            DumpMode::Off => 0,
            DumpMode::Text => 1,
            DumpMode::Hex => 2,
            DumpMode::Both => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DumpMode::Off),
            1 => Some(DumpMode::Text),
            2 => Some(DumpMode::Hex),
            3 => Some(DumpMode::Both),
            _ => None,
        }
    }

    fn shows_text(self) -> bool {
        matches!(self, DumpMode::Text | DumpMode::Both)
    }

    fn shows_hex(self) -> bool {
        matches!(self, DumpMode::Hex | DumpMode::Both)
    }
}

impl FromStr for DumpMode {
    type Err = Error;

    /// Accepts the numeric codes `0`..`3` or the mode names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let by_code = s.parse::<u8>().ok().and_then(DumpMode::from_code);
        let by_name = match s.to_ascii_lowercase().as_str() {
            "off" => Some(DumpMode::Off),
            "text" => Some(DumpMode::Text),
            "hex" => Some(DumpMode::Hex),
            "both" => Some(DumpMode::Both),
            _ => None,
        };
        by_code
            .or(by_name)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown dump mode '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Incoming => "in",
            Direction::Outgoing => "out",
        }
    }
}

/// Where dump traces are written.
pub enum DumpSink {
    /// Colored output on stdout.
    Console,
    Writer(Box<dyn Write + Send>),
}

/// Dump settings shared between the foreground and the receive loop.
pub struct Dumper {
    incoming: AtomicU8,
    outgoing: AtomicU8,
    sink: Mutex<DumpSink>,
}

impl Dumper {
    pub fn new(incoming: DumpMode, outgoing: DumpMode) -> Self {
        Self::with_sink(incoming, outgoing, DumpSink::Console)
    }

    pub fn with_sink(incoming: DumpMode, outgoing: DumpMode, sink: DumpSink) -> Self {
        Self {
            incoming: AtomicU8::new(incoming.code()),
            outgoing: AtomicU8::new(outgoing.code()),
            sink: Mutex::new(sink),
        }
    }

    pub fn set_modes(&self, incoming: DumpMode, outgoing: DumpMode) {
        self.incoming.store(incoming.code(), Ordering::SeqCst);
        self.outgoing.store(outgoing.code(), Ordering::SeqCst);
    }

    pub fn modes(&self) -> (DumpMode, DumpMode) {
        (self.mode(Direction::Incoming), self.mode(Direction::Outgoing))
    }

    pub fn set_sink(&self, sink: DumpSink) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn mode(&self, direction: Direction) -> DumpMode {
        let code = match direction {
            Direction::Incoming => self.incoming.load(Ordering::SeqCst),
            Direction::Outgoing => self.outgoing.load(Ordering::SeqCst),
        };
        DumpMode::from_code(code).unwrap_or_default()
    }

    /// Trace one packet if dumping is enabled for `direction`.
    pub fn dump(&self, direction: Direction, peer: SocketAddr, packet: &Packet, bytes: &[u8]) {
        let mode = self.mode(direction);
        if mode == DumpMode::Off {
            return;
        }
        let mut body = String::new();
        if mode.shows_text() {
            let _ = writeln!(body, "{}", packet);
        }
        if mode.shows_hex() {
            body.push_str(&hex_dump(bytes));
        }

        let label = format!("[{} {}] ", direction.label(), peer);
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match &mut *sink {
            DumpSink::Console => write_console(direction, &label, &body),
            DumpSink::Writer(writer) => writer
                .write_all(label.as_bytes())
                .and_then(|_| writer.write_all(body.as_bytes()))
                .and_then(|_| writer.flush()),
        };
        if let Err(e) = result {
            tracing::debug!("dump write failed: {}", e);
        }
    }
}

fn write_console(direction: Direction, label: &str, body: &str) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let color = match direction {
        Direction::Incoming => Color::Cyan,
        Direction::Outgoing => Color::Yellow,
    };
    stdout.set_color(ColorSpec::new().set_fg(Some(color)))?;
    write!(&mut stdout, "{}", label)?;
    stdout.reset()?;
    write!(&mut stdout, "{}", body)?;
    stdout.flush()
}

/// 16 bytes per row: offset, hex columns, printable ASCII.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "  {:04x}:", row * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {:02x}", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

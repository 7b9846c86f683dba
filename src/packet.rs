//! Typed OSC packets: messages, bundles and bundle time tags.
//!
//! These are plain values with no I/O attached. The wire format lives in
//! [`crate::codec`].

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// A single typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int(i32),
    Float(f32),
    Double(f64),
    Long(i64),
    String(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl Argument {
    /// The OSC type tag character this argument encodes with.
    pub fn type_tag(&self) -> char {
        match self {
            Argument::Int(_) => 'i',
            Argument::Float(_) => 'f',
            Argument::Double(_) => 'd',
            Argument::Long(_) => 'h',
            Argument::String(_) => 's',
            Argument::Bool(true) => 'T',
            Argument::Bool(false) => 'F',
            Argument::Blob(_) => 'b',
        }
    }

    /// Build an argument from an explicit type tag and its textual value.
    ///
    /// Accepted tags: `i`, `f`, `d`, `h`, `s`, `b` (hex digits), and the
    /// value-less `T` / `F`. Anything else is an unsupported type.
    pub fn from_tagged(tag: &str, value: &str) -> Result<Self> {
        let bad_value = || Error::InvalidCommand(format!("bad value '{}' for type '{}'", value, tag));
        match tag {
            "i" => value.parse().map(Argument::Int).map_err(|_| bad_value()),
            "f" => value.parse().map(Argument::Float).map_err(|_| bad_value()),
            "d" => value.parse().map(Argument::Double).map_err(|_| bad_value()),
            "h" => value.parse().map(Argument::Long).map_err(|_| bad_value()),
            "s" => Ok(Argument::String(value.to_string())),
            "b" => parse_hex(value).map(Argument::Blob).ok_or_else(bad_value),
            "T" if value.is_empty() => Ok(Argument::Bool(true)),
            "F" if value.is_empty() => Ok(Argument::Bool(false)),
            _ => Err(Error::UnsupportedArgumentType(tag.to_string())),
        }
    }
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Double(v)
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Long(v)
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        Argument::Bool(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::String(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::String(v)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(v: Vec<u8>) -> Self {
        Argument::Blob(v)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int(v) => write!(f, "{}", v),
            Argument::Float(v) => write!(f, "{}", v),
            Argument::Double(v) => write!(f, "{}", v),
            Argument::Long(v) => write!(f, "{}", v),
            Argument::String(s) => write!(f, "{:?}", s),
            Argument::Bool(b) => write!(f, "{}", b),
            Argument::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
        }
    }
}

/// An OSC message: an address pattern plus ordered, typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    name: String,
    args: Vec<Argument>,
}

impl Message {
    pub fn new(name: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// The address pattern, e.g. `/synth/freq`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Type tag string without the leading comma, e.g. `ifs`.
    pub fn type_tags(&self) -> String {
        self.args.iter().map(Argument::type_tag).collect()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ {:?}", self.name)?;
        for arg in &self.args {
            write!(f, ", {}", arg)?;
        }
        write!(f, " ]")
    }
}

/// 64-bit NTP-style bundle time tag: 32 bits of seconds since 1900 and
/// 32 bits of fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTag(u64);

impl TimeTag {
    /// The reserved "dispatch on receipt" value.
    pub const IMMEDIATE: TimeTag = TimeTag(1);

    pub const fn from_raw(raw: u64) -> Self {
        TimeTag(raw)
    }

    pub const fn from_parts(seconds: u32, fraction: u32) -> Self {
        TimeTag(((seconds as u64) << 32) | fraction as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn fraction(self) -> u32 {
        self.0 as u32
    }

    /// Zero and the reserved value 1 both mean "now".
    pub const fn is_immediate(self) -> bool {
        self.0 <= 1
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let ntp = match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Duration::from_secs(NTP_UNIX_OFFSET).saturating_add(since),
            Err(before) => Duration::from_secs(NTP_UNIX_OFFSET).saturating_sub(before.duration()),
        };
        let fraction = ((ntp.subsec_nanos() as u64) << 32) / 1_000_000_000;
        // Seconds wrap at the NTP era boundary.
        TimeTag::from_parts(ntp.as_secs() as u32, fraction as u32)
    }

    /// Like [`TimeTag::from_system_time`], but `None` for times outside the
    /// first NTP era and for times so close to 1900 they would read as
    /// immediate.
    pub fn checked_from_system_time(time: SystemTime) -> Option<Self> {
        let ntp = match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Duration::from_secs(NTP_UNIX_OFFSET).checked_add(since)?,
            Err(before) => Duration::from_secs(NTP_UNIX_OFFSET).checked_sub(before.duration())?,
        };
        let seconds = u32::try_from(ntp.as_secs()).ok()?;
        let fraction = ((ntp.subsec_nanos() as u64) << 32) / 1_000_000_000;
        let tag = TimeTag::from_parts(seconds, fraction as u32);
        (!tag.is_immediate()).then_some(tag)
    }

    /// Wall-clock time this tag designates, or `None` for immediate tags.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self.is_immediate() {
            return None;
        }
        let nanos = ((self.fraction() as u64) * 1_000_000_000) >> 32;
        let seconds = self.seconds() as u64;
        let time = if seconds >= NTP_UNIX_OFFSET {
            UNIX_EPOCH + Duration::new(seconds - NTP_UNIX_OFFSET, nanos as u32)
        } else {
            UNIX_EPOCH - Duration::from_secs(NTP_UNIX_OFFSET - seconds) + Duration::from_nanos(nanos)
        };
        Some(time)
    }
}

impl fmt::Display for TimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_immediate() {
            write!(f, "immediate")
        } else {
            write!(f, "{}.{:08x}", self.seconds(), self.fraction())
        }
    }
}

/// A time-tagged group of packets.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    time_tag: TimeTag,
    elements: Vec<Packet>,
}

impl Bundle {
    pub fn new(time_tag: TimeTag) -> Self {
        Self {
            time_tag,
            elements: Vec::new(),
        }
    }

    pub fn with_elements(time_tag: TimeTag, elements: Vec<Packet>) -> Self {
        Self { time_tag, elements }
    }

    pub fn time_tag(&self) -> TimeTag {
        self.time_tag
    }

    pub fn elements(&self) -> &[Packet] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub(crate) fn push(&mut self, packet: Packet) {
        self.elements.push(packet);
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ \"#bundle\", {}", self.time_tag)?;
        for element in &self.elements {
            write!(f, ", {}", element)?;
        }
        write!(f, " ]")
    }
}

/// Anything that travels as one OSC packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// All messages in depth-first order, each paired with the time tag of
    /// the innermost bundle holding it (`None` for a bare message).
    pub fn flatten(&self) -> Vec<(&Message, Option<TimeTag>)> {
        let mut out = Vec::new();
        collect_messages(self, None, &mut out);
        out
    }
}

fn collect_messages<'a>(
    packet: &'a Packet,
    time_tag: Option<TimeTag>,
    out: &mut Vec<(&'a Message, Option<TimeTag>)>,
) {
    match packet {
        Packet::Message(msg) => out.push((msg, time_tag)),
        Packet::Bundle(bundle) => {
            for element in &bundle.elements {
                collect_messages(element, Some(bundle.time_tag), out);
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(msg: Message) -> Self {
        Packet::Message(msg)
    }
}

impl From<Bundle> for Packet {
    fn from(bundle: Bundle) -> Self {
        Packet::Bundle(bundle)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Message(msg) => msg.fmt(f),
            Packet::Bundle(bundle) => bundle.fmt(f),
        }
    }
}

//! OSC 1.0 wire format for [`Packet`]s, plus the length-prefix framing used on
//! stream transports.
//!
//! The byte-level work is done by `rosc`; this module converts between its
//! packet types and ours. Decode failures are [`Error::MalformedPacket`],
//! encode failures [`Error::EncodeFailed`].

use std::io::{self, Read};

use rosc::{decoder, encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::error::{Error, Result};
use crate::packet::{Argument, Bundle, Message, Packet, TimeTag};

/// Encode a packet into its OSC wire bytes.
///
/// Every message address must start with `/`, otherwise no OSC decoder
/// would accept the result.
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    if let Some((msg, _)) = packet
        .flatten()
        .into_iter()
        .find(|(msg, _)| !msg.name().starts_with('/'))
    {
        return Err(Error::EncodeFailed(format!(
            "address \"{}\" does not start with '/'",
            msg.name()
        )));
    }
    encoder::encode(&to_osc(packet)).map_err(|e| Error::EncodeFailed(e.to_string()))
}

/// Decode exactly one packet from `bytes`.
///
/// The whole buffer must be consumed; trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    if bytes.is_empty() {
        return Err(Error::MalformedPacket("empty packet".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(Error::MalformedPacket(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let (rest, packet) =
        decoder::decode_udp(bytes).map_err(|e| Error::MalformedPacket(e.to_string()))?;
    if !rest.is_empty() {
        return Err(Error::MalformedPacket(format!(
            "{} trailing bytes after packet",
            rest.len()
        )));
    }
    from_osc(packet)
}

/// Prefix `bytes` with its length as a 4-byte big-endian integer.
pub fn frame(bytes: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(bytes.len() + 4);
    framed.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    framed.extend_from_slice(bytes);
    framed
}

/// Read one length-prefixed packet from a byte stream.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame starts.
/// A frame longer than `limit` is skipped and reported as `InvalidData`, so
/// the stream stays positioned at the next frame.
pub fn read_frame<R: Read>(reader: &mut R, limit: usize) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > limit {
        let skipped = io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        if skipped < len as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the limit of {} bytes", len, limit),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

fn to_osc(packet: &Packet) -> OscPacket {
    match packet {
        Packet::Message(msg) => OscPacket::Message(OscMessage {
            addr: msg.name().to_string(),
            args: msg.args().iter().map(to_osc_arg).collect(),
        }),
        Packet::Bundle(bundle) => {
            let tag = bundle.time_tag();
            OscPacket::Bundle(OscBundle {
                timetag: OscTime {
                    seconds: tag.seconds(),
                    fractional: tag.fraction(),
                },
                content: bundle.elements().iter().map(to_osc).collect(),
            })
        }
    }
}

fn to_osc_arg(arg: &Argument) -> OscType {
    match arg {
        Argument::Int(v) => OscType::Int(*v),
        Argument::Float(v) => OscType::Float(*v),
        Argument::Double(v) => OscType::Double(*v),
        Argument::Long(v) => OscType::Long(*v),
        Argument::String(s) => OscType::String(s.clone()),
        Argument::Bool(b) => OscType::Bool(*b),
        Argument::Blob(bytes) => OscType::Blob(bytes.clone()),
    }
}

fn from_osc(packet: OscPacket) -> Result<Packet> {
    match packet {
        OscPacket::Message(msg) => {
            let args = msg
                .args
                .into_iter()
                .map(from_osc_arg)
                .collect::<Result<Vec<_>>>()?;
            Ok(Packet::Message(Message::new(msg.addr, args)))
        }
        OscPacket::Bundle(bundle) => {
            let tag = TimeTag::from_parts(bundle.timetag.seconds, bundle.timetag.fractional);
            let elements = bundle
                .content
                .into_iter()
                .map(from_osc)
                .collect::<Result<Vec<_>>>()?;
            Ok(Packet::Bundle(Bundle::with_elements(tag, elements)))
        }
    }
}

fn from_osc_arg(arg: OscType) -> Result<Argument> {
    match arg {
        OscType::Int(v) => Ok(Argument::Int(v)),
        OscType::Float(v) => Ok(Argument::Float(v)),
        OscType::Double(v) => Ok(Argument::Double(v)),
        OscType::Long(v) => Ok(Argument::Long(v)),
        OscType::String(s) => Ok(Argument::String(s)),
        OscType::Bool(b) => Ok(Argument::Bool(b)),
        OscType::Blob(bytes) => Ok(Argument::Blob(bytes)),
        other => Err(Error::MalformedPacket(format!(
            "unsupported argument {:?}",
            other
        ))),
    }
}

//! Console commands and their effect on a [`Session`].
//!
//! Each input line parses into exactly one [`Command`]. Lines starting with
//! `/` are OSC messages whose arguments carry explicit type prefixes.

use std::str::FromStr;

use crate::config::DEFAULT_HOST;
use crate::dump::DumpMode;
use crate::error::{Error, Result};
use crate::packet::{Argument, Message};
use crate::session::{Session, Target};

pub const HELP: &str = "\
Commands:
  target [host] <port>      - Set the target (host defaults to 127.0.0.1)
  gettarget                 - Show the target
  getlocalport              - Show the local port
  dumpOSC <mode> [<out>]    - Dump traffic: 0 off, 1 text, 2 hex, 3 both
  openbundle [ms]           - Start a bundle, optionally delayed
  closebundle               - Send the open bundle
  freezetime / unfreezetime - Pin or release the bundle reference time
  disconnect                - Close the connection and forget the target
  /address [args...]        - Send (or bundle) a message; args are typed:
                              i:1 f:2.5 d:0.1 h:64 s:text b:00ff T F
  help/h                    - Show this help
  exit/quit/q               - Exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Target { host: String, port: u16 },
    GetTarget,
    GetLocalPort,
    DumpOsc { incoming: DumpMode, outgoing: DumpMode },
    OpenBundle { delay_ms: Option<i64> },
    CloseBundle,
    FreezeTime,
    UnfreezeTime,
    Disconnect,
    Message(Message),
    Help,
    Exit,
}

/// Information a command hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Target(Target),
    LocalPort(u16),
}

impl Command {
    pub fn execute(self, session: &mut Session) -> Result<Option<Reply>> {
        match self {
            Command::Target { host, port } => session.set_target(&host, port),
            Command::GetTarget => {
                let target = session.target().cloned().ok_or(Error::NoTarget)?;
                return Ok(Some(Reply::Target(target)));
            }
            Command::GetLocalPort => return Ok(Some(Reply::LocalPort(session.local_port()))),
            Command::DumpOsc { incoming, outgoing } => session.set_dump_mode(incoming, outgoing),
            Command::OpenBundle { delay_ms } => {
                session.open_bundle(delay_ms)?;
            }
            Command::CloseBundle => session.close_bundle()?,
            Command::FreezeTime => session.freeze_time(),
            Command::UnfreezeTime => session.unfreeze_time(),
            Command::Disconnect => session.disconnect(),
            Command::Message(message) => session.post(message)?,
            Command::Help | Command::Exit => {}
        }
        Ok(None)
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(Command::Exit);
        };
        let args: Vec<&str> = words.collect();

        if head.starts_with('/') {
            let args = args
                .iter()
                .map(|word| parse_argument(word))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Command::Message(Message::new(head, args)));
        }

        let illegal_args = || Error::InvalidCommand(format!("illegal message args for \"{}\"", head));
        let command = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("target", [port]) => Command::Target {
                host: DEFAULT_HOST.to_string(),
                port: port.parse().map_err(|_| illegal_args())?,
            },
            ("target", [host, port]) => Command::Target {
                host: host.to_string(),
                port: port.parse().map_err(|_| illegal_args())?,
            },
            ("gettarget", []) => Command::GetTarget,
            ("getlocalport", []) => Command::GetLocalPort,
            ("dumposc", [mode]) => {
                let mode: DumpMode = mode.parse()?;
                Command::DumpOsc {
                    incoming: mode,
                    outgoing: mode,
                }
            }
            ("dumposc", [incoming, outgoing]) => Command::DumpOsc {
                incoming: incoming.parse()?,
                outgoing: outgoing.parse()?,
            },
            ("openbundle", []) => Command::OpenBundle { delay_ms: None },
            ("openbundle", [delay]) => Command::OpenBundle {
                delay_ms: Some(delay.parse().map_err(|_| illegal_args())?),
            },
            ("closebundle", []) => Command::CloseBundle,
            ("freezetime", []) => Command::FreezeTime,
            ("unfreezetime", []) => Command::UnfreezeTime,
            ("disconnect", []) => Command::Disconnect,
            ("help" | "h", []) => Command::Help,
            ("exit" | "quit" | "q", []) => Command::Exit,
            (
                "target" | "gettarget" | "getlocalport" | "dumposc" | "openbundle"
                | "closebundle" | "freezetime" | "unfreezetime" | "disconnect" | "help" | "h"
                | "exit" | "quit" | "q",
                _,
            ) => return Err(illegal_args()),
            _ => {
                return Err(Error::InvalidCommand(format!(
                    "doesn't understand \"{}\"",
                    head
                )))
            }
        };
        Ok(command)
    }
}

/// `T` and `F` stand alone; every other argument is `<tag>:<value>`.
fn parse_argument(word: &str) -> Result<Argument> {
    match word {
        "T" | "F" => Argument::from_tagged(word, ""),
        _ => match word.split_once(':') {
            Some((tag, value)) => Argument::from_tagged(tag, value),
            None => Err(Error::UnsupportedArgumentType(format!(
                "'{}' has no type prefix (use i:, f:, d:, h:, s:, b:, T or F)",
                word
            ))),
        },
    }
}

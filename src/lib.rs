//! OSC client engine: typed messages and bundles, the OSC wire codec, UDP and
//! TCP transports with a background receive loop, and a session that builds
//! one bundle at a time and connects lazily to its target.
//!
//! ```no_run
//! use osc_client::{Message, Protocol, Session};
//!
//! let mut session = Session::new(Protocol::Udp, 0);
//! session.add_listener(|msg, sender, _when| println!("{} from {}", msg, sender));
//! session.set_target("127.0.0.1", 57120);
//!
//! session.send(Message::new("/synth/freq", vec![440.0f32.into()]))?;
//!
//! session.open_bundle(Some(100))?;
//! session.add_to_open_bundle(Message::new("/note", vec![60.into()]))?;
//! session.close_bundle()?;
//! # Ok::<(), osc_client::Error>(())
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod dump;
pub mod error;
pub mod general;
pub mod logging;
pub mod packet;
pub mod remote;
pub mod session;

pub use command::{Command, Reply};
pub use config::{Config, Protocol};
pub use dump::{DumpMode, DumpSink};
pub use error::{Error, Result};
pub use packet::{Argument, Bundle, Message, Packet, TimeTag};
pub use session::{Listener, ListenerId, Session, SessionState, Target};

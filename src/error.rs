use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no target socket address (use \"target\" to set it)")]
    NoTarget,

    #[error("while connecting to {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("while sending OSC packet: {0}")]
    SendFailed(#[source] io::Error),

    #[error("cannot nest bundles")]
    BundleAlreadyOpen,

    #[error("no open bundle")]
    NoBundleOpen,

    #[error("malformed OSC packet: {0}")]
    MalformedPacket(String),

    #[error("cannot encode OSC packet: {0}")]
    EncodeFailed(String),

    #[error("packet of {size} bytes exceeds the limit of {limit} bytes")]
    PacketTooLarge { size: usize, limit: usize },

    #[error("unsupported argument type: {0}")]
    UnsupportedArgumentType(String),

    #[error("{0}")]
    InvalidCommand(String),

    #[error("failed to load config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

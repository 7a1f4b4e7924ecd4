//! Error types for node, mailbox and codec operations.

use crate::core::Pid;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the library.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket read/write failure on an established connection.
    ///
    /// Raised inside the IO loop, which reacts by evicting the connection
    /// from the registry; surfaced to callers only through logs.
    #[error("i/o error on connection to {peer}: {source}")]
    ConnectionIo {
        /// The peer node the connection belonged to.
        peer: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The distribution handshake with a peer failed.
    ///
    /// Bad status, unsupported version, or a digest mismatch (wrong cookie).
    #[error("handshake with remote node failed: {0}")]
    HandshakeFailure(String),

    /// A timed receive expired before a message arrived.
    #[error("receive timed out")]
    ReceiveTimeout,

    /// A link held by the receiving mailbox was broken.
    ///
    /// Reported from `receive` in queue order; `reason` is the exit reason
    /// (`"normal"`, `"error"`, `"noconnection"`, or whatever the peer sent).
    #[error("link to {pid} broken: {reason}")]
    LinkBroken {
        /// The exit reason delivered with the signal.
        reason: String,
        /// The linked process that went away.
        pid: Pid,
    },

    /// A term handed to the codec cannot be represented on the wire.
    #[error("cannot encode {term}: {detail}")]
    Encoding {
        /// Name of the offending term type.
        term: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// A local send addressed a pid or registered name with no live mailbox.
    #[error("no mailbox known as {0}")]
    DeliveryFailure(String),

    /// A node identifier did not have the `name@host` shape.
    #[error("invalid node name: {0}")]
    InvalidNodeName(String),

    /// Catch-all for protocol violations and unexpected peer behaviour.
    #[error("{0}")]
    Protocol(String),

    /// Socket-level failure outside an established connection (EPMD, dial, bind).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

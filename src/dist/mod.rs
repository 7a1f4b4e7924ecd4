//! Distribution wiring: framing, handshake, control messages, connections.

pub(crate) mod connection;
pub(crate) mod control;
pub(crate) mod framer;
pub(crate) mod handshake;

/// Node type advertised to the port mapper: hidden (not a full BEAM node).
pub(crate) const NODE_TYPE_HIDDEN: u8 = 72;

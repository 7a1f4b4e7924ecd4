//! Port mapper (EPMD) client.
//!
//! Calls to the port mapper are rare (one registration per node, one
//! lookup per outgoing connection), so they run on dedicated synchronous
//! sockets instead of being multiplexed into the async loop.
//!
//! Registration (ALIVE2) keeps its socket open: the node stays registered
//! exactly as long as the socket lives, and unregisters by closing it.
//! Lookups (PORT_PLEASE2) are one-shot request/response exchanges.

use crate::dist::NODE_TYPE_HIDDEN;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

/// Where EPMD listens unless configured otherwise.
pub(crate) const DEFAULT_PORT: u16 = 4369;

const ALIVE2_REQ: u8 = 120;
const ALIVE2_RESP: u8 = 121;
const PORT_PLEASE2_REQ: u8 = 122;
const PORT2_RESP: u8 = 119;

/// Both distribution version fields sent in ALIVE2.
const DIST_VERSION: u16 = 5;

/// A live registration at the port mapper.
///
/// Dropping this handle closes the socket, which unregisters the node.
#[derive(Debug)]
pub(crate) struct Registration {
    // Held only to keep the registration alive.
    _socket: TcpStream,
    /// Incarnation number assigned by EPMD.
    pub(crate) creation: u16,
}

/// Registers `name` (the part before the `@`) as a hidden node listening
/// on `listen_port`.
pub(crate) fn register(epmd: SocketAddr, name: &str, listen_port: u16) -> Result<Registration> {
    let mut socket = TcpStream::connect(epmd)?;

    let request = build_alive2_request(name, listen_port)?;
    socket.write_all(&request)?;

    let mut reply = [0u8; 4];
    socket.read_exact(&mut reply)?;
    let creation = parse_alive2_response(&reply)?;

    tracing::info!(name, listen_port, creation, "registered at the port mapper");
    Ok(Registration {
        _socket: socket,
        creation,
    })
}

/// Asks the port mapper on `epmd` for the listen port of node `name`.
pub(crate) fn lookup_port(epmd: SocketAddr, name: &str) -> Result<u16> {
    // One-shot: a fresh socket per request, closed on return.
    let mut socket = TcpStream::connect(epmd)?;
    socket.write_all(&build_port_please2_request(name)?)?;

    let mut reply = Vec::new();
    socket.read_to_end(&mut reply)?;
    parse_port2_response(&reply, name)
}

fn build_alive2_request(name: &str, listen_port: u16) -> Result<Vec<u8>> {
    let name_len = u16::try_from(name.len())
        .map_err(|_| Error::InvalidNodeName(name.to_string()))?;

    let mut body = Vec::with_capacity(13 + name.len());
    body.write_u8(ALIVE2_REQ)?;
    body.write_u16::<BigEndian>(listen_port)?;
    body.write_u8(NODE_TYPE_HIDDEN)?;
    body.write_u8(0)?; // protocol: tcp/ipv4
    body.write_u16::<BigEndian>(DIST_VERSION)?; // highest version
    body.write_u16::<BigEndian>(DIST_VERSION)?; // lowest version
    body.write_u16::<BigEndian>(name_len)?;
    body.write_all(name.as_bytes())?;
    body.write_u16::<BigEndian>(0)?; // no extra info

    let mut request = Vec::with_capacity(2 + body.len());
    request.write_u16::<BigEndian>(body.len() as u16)?;
    request.extend_from_slice(&body);
    Ok(request)
}

fn parse_alive2_response(reply: &[u8]) -> Result<u16> {
    let mut r = reply;
    if r.read_u8()? != ALIVE2_RESP {
        return Err(Error::Protocol("unexpected reply to ALIVE2".into()));
    }
    let result = r.read_u8()?;
    let creation = r.read_u16::<BigEndian>()?;
    if result != 0 {
        return Err(Error::Protocol(format!(
            "port mapper refused the registration (result {result})"
        )));
    }
    Ok(creation)
}

fn build_port_please2_request(name: &str) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(3 + name.len());
    request.write_u16::<BigEndian>(1 + name.len() as u16)?;
    request.write_u8(PORT_PLEASE2_REQ)?;
    request.write_all(name.as_bytes())?;
    Ok(request)
}

fn parse_port2_response(reply: &[u8], name: &str) -> Result<u16> {
    let mut r = reply;
    if r.read_u8()? != PORT2_RESP {
        return Err(Error::Protocol("unexpected reply to PORT_PLEASE2".into()));
    }
    let result = r.read_u8()?;
    if result != 0 {
        return Err(Error::Protocol(format!(
            "port mapper knows no node named {name} (result {result})"
        )));
    }
    // The remaining fields (node type, versions, name echo) are ignored.
    Ok(r.read_u16::<BigEndian>()?)
}

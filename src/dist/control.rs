//! Control messages: the distributed operations exchanged once connected.
//!
//! Every connected-mode frame is an envelope: a pass-through byte (112),
//! the term version (131), and a control tuple whose first element is the
//! operation tag. SEND and REG_SEND append a payload behind the control
//! tuple, prefixed with its own version byte; the payload is carried
//! opaquely and only parsed when the receiving mailbox matches it.

use crate::core::Pid;
use crate::error::{Error, Result};
use crate::term::decode::Reader;
use crate::term::{decode, Term, MAGIC_VERSION};

/// Envelope marker in front of every control message.
pub(crate) const PASS_THROUGH: u8 = 112;

const OP_LINK: i32 = 1;
const OP_SEND: i32 = 2;
const OP_EXIT: i32 = 3;
const OP_UNLINK: i32 = 4;
const OP_REG_SEND: i32 = 6;
const OP_EXIT2: i32 = 8;

/// A parsed distributed operation.
#[derive(Debug, PartialEq)]
pub(crate) enum ControlMessage {
    /// `{1, From, To}`: set up a bidirectional link.
    Link { from: Pid, to: Pid },
    /// `{2, Cookie, To}`: deliver the payload to a pid.
    Send { to: Pid, payload: Vec<u8> },
    /// `{3, From, To, Reason}`: uncontrolled exit of a linked process.
    Exit { from: Pid, to: Pid, reason: String },
    /// `{4, From, To}`: tear down a link.
    Unlink { from: Pid, to: Pid },
    /// `{6, From, Cookie, ToName}`: deliver the payload to a registered name.
    RegSend {
        from: Pid,
        to_name: String,
        payload: Vec<u8>,
    },
    /// `{8, From, To, Reason}`: controlled exit of a linked process.
    Exit2 { from: Pid, to: Pid, reason: String },
}

impl ControlMessage {
    /// Parses a framed message (length prefix already stripped).
    pub(crate) fn parse(frame: &[u8]) -> Result<Self> {
        let mut r = Reader::new(frame);
        if r.u8() != Some(PASS_THROUGH) {
            return Err(Error::Protocol("control message lacks pass-through".into()));
        }
        check_version(&mut r)?;

        let control = decode::read_term(&mut r)
            .ok_or_else(|| Error::Protocol("malformed control tuple".into()))?;
        let elems = control
            .as_tuple()
            .ok_or_else(|| Error::Protocol("control message is not a tuple".into()))?;
        let op = elems
            .first()
            .and_then(Term::as_int)
            .ok_or_else(|| Error::Protocol("control tuple lacks an operation tag".into()))?;

        match (op, elems) {
            (OP_LINK, [_, from, to]) => Ok(ControlMessage::Link {
                from: need_pid(from)?,
                to: need_pid(to)?,
            }),
            (OP_SEND, [_, _cookie, to]) => Ok(ControlMessage::Send {
                to: need_pid(to)?,
                payload: take_payload(&mut r)?,
            }),
            (OP_EXIT, [_, from, to, reason]) => Ok(ControlMessage::Exit {
                from: need_pid(from)?,
                to: need_pid(to)?,
                reason: need_atom(reason)?,
            }),
            (OP_UNLINK, [_, from, to]) => Ok(ControlMessage::Unlink {
                from: need_pid(from)?,
                to: need_pid(to)?,
            }),
            (OP_REG_SEND, [_, from, _cookie, to_name]) => Ok(ControlMessage::RegSend {
                from: need_pid(from)?,
                to_name: need_atom(to_name)?,
                payload: take_payload(&mut r)?,
            }),
            (OP_EXIT2, [_, from, to, reason]) => Ok(ControlMessage::Exit2 {
                from: need_pid(from)?,
                to: need_pid(to)?,
                reason: need_atom(reason)?,
            }),
            _ => Err(Error::Protocol(format!(
                "unsupported distributed operation {op}"
            ))),
        }
    }
}

fn check_version(r: &mut Reader<'_>) -> Result<()> {
    match r.u8() {
        Some(MAGIC_VERSION) => Ok(()),
        Some(other) => Err(Error::Protocol(format!(
            "wrong term version: got {other}, expected {MAGIC_VERSION}"
        ))),
        None => Err(Error::Protocol("truncated control message".into())),
    }
}

/// The rest of the frame after its own version byte.
fn take_payload(r: &mut Reader<'_>) -> Result<Vec<u8>> {
    check_version(r)?;
    Ok(r.remaining().to_vec())
}

fn need_pid(t: &Term) -> Result<Pid> {
    t.as_pid()
        .cloned()
        .ok_or_else(|| Error::Protocol("expected a pid in the control tuple".into()))
}

fn need_atom(t: &Term) -> Result<String> {
    t.as_atom()
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol("expected an atom in the control tuple".into()))
}

// ---------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------

fn control_frame(control: Term) -> Vec<u8> {
    let mut buf = vec![PASS_THROUGH, MAGIC_VERSION];
    control
        .encode(&mut buf)
        .expect("control tuples are always encodable");
    buf
}

fn control_frame_with_payload(control: Term, payload: &[u8]) -> Vec<u8> {
    let mut buf = control_frame(control);
    // One version byte per payload; compound terms don't repeat it.
    buf.push(MAGIC_VERSION);
    buf.extend_from_slice(payload);
    buf
}

/// `{2, '', To}` followed by the payload.
pub(crate) fn send_frame(to: &Pid, payload: &[u8]) -> Vec<u8> {
    let control = Term::tuple(vec![
        Term::int(OP_SEND),
        Term::atom(""),
        Term::Pid(to.clone()),
    ]);
    control_frame_with_payload(control, payload)
}

/// `{6, From, '', ToName}` followed by the payload.
pub(crate) fn reg_send_frame(from: &Pid, to_name: &str, payload: &[u8]) -> Vec<u8> {
    let control = Term::tuple(vec![
        Term::int(OP_REG_SEND),
        Term::Pid(from.clone()),
        Term::atom(""),
        Term::atom(to_name),
    ]);
    control_frame_with_payload(control, payload)
}

/// `{1, From, To}`.
pub(crate) fn link_frame(from: &Pid, to: &Pid) -> Vec<u8> {
    control_frame(Term::tuple(vec![
        Term::int(OP_LINK),
        Term::Pid(from.clone()),
        Term::Pid(to.clone()),
    ]))
}

/// `{4, From, To}`.
pub(crate) fn unlink_frame(from: &Pid, to: &Pid) -> Vec<u8> {
    control_frame(Term::tuple(vec![
        Term::int(OP_UNLINK),
        Term::Pid(from.clone()),
        Term::Pid(to.clone()),
    ]))
}

/// `{3, From, To, Reason}`.
pub(crate) fn exit_frame(from: &Pid, to: &Pid, reason: &str) -> Vec<u8> {
    control_frame(Term::tuple(vec![
        Term::int(OP_EXIT),
        Term::Pid(from.clone()),
        Term::Pid(to.clone()),
        Term::atom(reason),
    ]))
}

/// `{8, From, To, Reason}`.
pub(crate) fn exit2_frame(from: &Pid, to: &Pid, reason: &str) -> Vec<u8> {
    control_frame(Term::tuple(vec![
        Term::int(OP_EXIT2),
        Term::Pid(from.clone()),
        Term::Pid(to.clone()),
        Term::atom(reason),
    ]))
}

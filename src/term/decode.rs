//! External-format parsing.
//!
//! Decoding works over a [`Reader`] cursor so that the pattern matchers can
//! attempt a parse and rewind on failure. All readers return `None` on
//! truncated input or a tag they don't handle; the public [`decode`] entry
//! point converts that into a protocol error.

use super::tag;
use super::Term;
use crate::core::{Binary, Pid, Reference};
use crate::error::{Error, Result};

/// Byte cursor with explicit save/restore of the position.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.buf.len());
        self.pos = pos;
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// The slice covered between a saved position and the current one.
    pub(crate) fn span(&self, from: usize) -> &'a [u8] {
        &self.buf[from..self.pos]
    }

    pub(crate) fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Some(b)
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
}

/// Parses one term from `bytes`, returning it with its encoded width.
pub(crate) fn decode(bytes: &[u8]) -> Result<(Term, usize)> {
    let mut r = Reader::new(bytes);
    match read_term(&mut r) {
        Some(term) => Ok((term, r.pos())),
        None => Err(Error::Protocol(match bytes.first() {
            Some(tag) => format!("malformed or unsupported term (tag {tag})"),
            None => "empty term".into(),
        })),
    }
}

/// Reads an integer in either the packed or the 4-byte form.
pub(crate) fn read_int(r: &mut Reader<'_>) -> Option<i32> {
    match r.u8()? {
        tag::SMALL_INTEGER => r.u8().map(i32::from),
        tag::INTEGER => r.i32(),
        _ => None,
    }
}

pub(crate) fn read_atom(r: &mut Reader<'_>) -> Option<String> {
    if r.u8()? != tag::ATOM {
        return None;
    }
    let len = r.u16()? as usize;
    let bytes = r.take(len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

pub(crate) fn read_float(r: &mut Reader<'_>) -> Option<f64> {
    if r.u8()? != tag::FLOAT {
        return None;
    }
    let raw = r.take(super::FLOAT_DIGITS)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end]).ok()?;
    text.trim().parse().ok()
}

pub(crate) fn read_pid(r: &mut Reader<'_>) -> Option<Pid> {
    if r.u8()? != tag::PID {
        return None;
    }
    let node = read_atom(r)?;
    let id = r.u32()?;
    let serial = r.u32()?;
    let creation = r.u8()?;
    Some(Pid::new(node, id, serial, creation as u32))
}

pub(crate) fn read_reference(r: &mut Reader<'_>) -> Option<Reference> {
    if r.u8()? != tag::NEW_REFERENCE {
        return None;
    }
    let words = r.u16()? as usize;
    let node = read_atom(r)?;
    let creation = r.u8()?;
    let id = r.take(words * 4)?;
    Some(Reference::from_wire(node, creation as u32, id.to_vec()))
}

/// Reads a binary in either the whole-byte or the bit-string form.
pub(crate) fn read_binary(r: &mut Reader<'_>) -> Option<Binary> {
    match r.u8()? {
        tag::BINARY => {
            let len = r.u32()? as usize;
            Some(Binary::new(r.take(len)?.to_vec()))
        }
        tag::BIT_BINARY => {
            let len = r.u32()? as usize;
            let padding = r.u8()?;
            let bytes = r.take(len)?.to_vec();
            Binary::with_padding(bytes, padding).ok()
        }
        _ => None,
    }
}

/// Reads the packed string form, returning its raw bytes.
pub(crate) fn read_string_bytes(r: &mut Reader<'_>) -> Option<Vec<u8>> {
    if r.u8()? != tag::STRING {
        return None;
    }
    let len = r.u16()? as usize;
    Some(r.take(len)?.to_vec())
}

/// Reads any single supported term, dispatching on the leading tag.
pub(crate) fn read_term(r: &mut Reader<'_>) -> Option<Term> {
    match r.peek_u8()? {
        tag::SMALL_INTEGER | tag::INTEGER => read_int(r).map(Term::Int),
        tag::FLOAT => read_float(r).map(Term::Float),
        tag::ATOM => read_atom(r).map(Term::Atom),
        tag::PID => read_pid(r).map(Term::Pid),
        tag::NEW_REFERENCE => read_reference(r).map(Term::Ref),
        tag::BINARY | tag::BIT_BINARY => read_binary(r).map(Term::Binary),
        tag::STRING => {
            let bytes = read_string_bytes(r)?;
            Some(match String::from_utf8(bytes) {
                Ok(s) => Term::Str(s),
                // Packed strings are raw bytes; non-text ones surface as
                // the list of small integers they abbreviate.
                Err(raw) => Term::List(
                    raw.into_bytes()
                        .into_iter()
                        .map(|b| Term::Int(i32::from(b)))
                        .collect(),
                ),
            })
        }
        tag::NIL => {
            r.u8();
            Some(Term::List(Vec::new()))
        }
        tag::SMALL_TUPLE => {
            r.u8();
            let arity = r.u8()? as usize;
            let mut elems = Vec::with_capacity(arity);
            for _ in 0..arity {
                elems.push(read_term(r)?);
            }
            Some(Term::Tuple(elems))
        }
        tag::LIST => {
            r.u8();
            let len = r.u32()? as usize;
            let mut elems = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                elems.push(read_term(r)?);
            }
            // Improper lists are not supported; the tail must be nil.
            if r.u8()? != tag::NIL {
                return None;
            }
            Some(Term::List(elems))
        }
        _ => None,
    }
}

//! Term algebra and external-format serialization.
//!
//! A [`Term`] is one value of the cluster's term algebra: integers, floats,
//! atoms, pids, references, tuples, lists, strings and binaries. Encoding
//! follows the external term format used between distributed nodes; every
//! multi-byte integer on the wire is big-endian.
//!
//! A term encodes itself without the leading version byte (131); the
//! envelope writer prepends it exactly once per payload, since compound
//! terms don't repeat it for their children.
//!
//! # Examples
//!
//! ```
//! use erlink::Term;
//!
//! let t = Term::tuple(vec![Term::atom("ok"), Term::int(42)]);
//! let bytes = t.to_bytes().unwrap();
//! assert_eq!(bytes, [0x68, 0x02, 0x64, 0x00, 0x02, 0x6F, 0x6B, 0x61, 0x2A]);
//! ```

pub(crate) mod decode;
mod matchable;
pub mod pattern;

pub use matchable::Matchable;

use crate::core::{Binary, Pid, Reference};
use crate::error::{Error, Result};
use bytes::BufMut;

/// Single-byte type tags of the external term format.
pub(crate) mod tag {
    pub const BIT_BINARY: u8 = 77;
    pub const SMALL_INTEGER: u8 = 97;
    pub const INTEGER: u8 = 98;
    pub const FLOAT: u8 = 99;
    pub const ATOM: u8 = 100;
    pub const PID: u8 = 103;
    pub const SMALL_TUPLE: u8 = 104;
    pub const NIL: u8 = 106;
    pub const STRING: u8 = 107;
    pub const LIST: u8 = 108;
    pub const BINARY: u8 = 109;
    pub const NEW_REFERENCE: u8 = 114;
}

/// The version byte prefixed to every standalone payload.
pub(crate) const MAGIC_VERSION: u8 = 131;

/// Exact width of the text encoding of a float.
pub(crate) const FLOAT_DIGITS: usize = 31;

/// One value of the term algebra.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A 32-bit signed integer. Values in `0..=255` take the packed
    /// small-integer form on the wire.
    Int(i32),
    /// An IEEE double, transmitted as formatted text.
    Float(f64),
    /// An interned symbolic constant.
    Atom(String),
    /// A process identifier.
    Pid(Pid),
    /// An opaque cluster reference.
    Ref(Reference),
    /// A fixed-arity product of terms (arity at most 255).
    Tuple(Vec<Term>),
    /// A proper list of terms.
    List(Vec<Term>),
    /// A byte string; a compact encoding of a list of small integers.
    Str(String),
    /// A binary or bit-string.
    Binary(Binary),
}

impl Term {
    /// Creates an integer term.
    pub fn int(value: i32) -> Self {
        Term::Int(value)
    }

    /// Creates a float term.
    pub fn float(value: f64) -> Self {
        Term::Float(value)
    }

    /// Creates an atom term.
    pub fn atom(name: impl Into<String>) -> Self {
        Term::Atom(name.into())
    }

    /// Creates a string term.
    pub fn str(value: impl Into<String>) -> Self {
        Term::Str(value.into())
    }

    /// Creates a tuple term.
    pub fn tuple(elements: Vec<Term>) -> Self {
        Term::Tuple(elements)
    }

    /// Creates a list term.
    pub fn list(elements: Vec<Term>) -> Self {
        Term::List(elements)
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Term::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the atom name, if this is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the pid, if this is a pid.
    pub fn as_pid(&self) -> Option<&Pid> {
        match self {
            Term::Pid(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the elements, if this is a tuple.
    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(elems) => Some(elems),
            _ => None,
        }
    }

    /// Serializes this term, appending to `buf`.
    ///
    /// Children of compound terms are emitted in pre-order, each with its
    /// own type tag. No version byte is written.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Term::Int(v) => encode_int(buf, *v),
            Term::Float(v) => {
                buf.put_u8(tag::FLOAT);
                buf.extend_from_slice(&format_float(*v)?);
            }
            Term::Atom(name) => encode_atom(buf, name)?,
            Term::Pid(pid) => {
                buf.put_u8(tag::PID);
                encode_atom(buf, pid.node())?;
                buf.put_u32(pid.id());
                buf.put_u32(pid.serial());
                buf.put_u8(pid.creation() as u8);
            }
            Term::Ref(r) => {
                buf.put_u8(tag::NEW_REFERENCE);
                buf.put_u16((r.id().len() / 4) as u16);
                encode_atom(buf, r.node())?;
                buf.put_u8(r.creation() as u8);
                buf.extend_from_slice(r.id());
            }
            Term::Tuple(elems) => {
                if elems.len() > 255 {
                    return Err(Error::Encoding {
                        term: "tuple",
                        detail: format!("arity {} exceeds 255", elems.len()),
                    });
                }
                buf.put_u8(tag::SMALL_TUPLE);
                buf.put_u8(elems.len() as u8);
                for elem in elems {
                    elem.encode(buf)?;
                }
            }
            Term::List(elems) => {
                if elems.is_empty() {
                    buf.put_u8(tag::NIL);
                } else if let Some(packed) = packable_as_string(elems) {
                    encode_string_bytes(buf, &packed);
                } else {
                    buf.put_u8(tag::LIST);
                    buf.put_u32(elems.len() as u32);
                    for elem in elems {
                        elem.encode(buf)?;
                    }
                    buf.put_u8(tag::NIL);
                }
            }
            Term::Str(s) => {
                if s.is_empty() {
                    buf.put_u8(tag::NIL);
                } else if s.len() <= u16::MAX as usize {
                    encode_string_bytes(buf, s.as_bytes());
                } else {
                    // Too long for the packed form; fall back to a list of
                    // small integers.
                    buf.put_u8(tag::LIST);
                    buf.put_u32(s.len() as u32);
                    for byte in s.bytes() {
                        encode_int(buf, byte as i32);
                    }
                    buf.put_u8(tag::NIL);
                }
            }
            Term::Binary(b) => {
                if b.is_whole_bytes() {
                    buf.put_u8(tag::BINARY);
                    buf.put_u32(b.bytes().len() as u32);
                    buf.extend_from_slice(b.bytes());
                } else {
                    buf.put_u8(tag::BIT_BINARY);
                    buf.put_u32(b.bytes().len() as u32);
                    buf.put_u8(b.padding_bits());
                    buf.extend_from_slice(b.bytes());
                }
            }
        }
        Ok(())
    }

    /// Serializes this term into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Parses one term from the start of `bytes`.
    ///
    /// Returns the term and the number of bytes it covered.
    pub fn decode(bytes: &[u8]) -> Result<(Term, usize)> {
        decode::decode(bytes)
    }
}

fn encode_int(buf: &mut Vec<u8>, v: i32) {
    // Small values pack into two bytes.
    if (0..=255).contains(&v) {
        buf.put_u8(tag::SMALL_INTEGER);
        buf.put_u8(v as u8);
    } else {
        buf.put_u8(tag::INTEGER);
        buf.put_i32(v);
    }
}

fn encode_atom(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.len() > u16::MAX as usize {
        return Err(Error::Encoding {
            term: "atom",
            detail: format!("name of {} bytes exceeds 65535", name.len()),
        });
    }
    buf.put_u8(tag::ATOM);
    buf.put_u16(name.len() as u16);
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

fn encode_string_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.put_u8(tag::STRING);
    buf.put_u16(bytes.len() as u16);
    buf.extend_from_slice(bytes);
}

/// Returns the packed byte form if every element is an integer in `0..=255`
/// and the length fits the 16-bit string header.
fn packable_as_string(elems: &[Term]) -> Option<Vec<u8>> {
    if elems.len() > u16::MAX as usize {
        return None;
    }
    elems
        .iter()
        .map(|t| match t {
            Term::Int(v) if (0..=255).contains(v) => Some(*v as u8),
            _ => None,
        })
        .collect()
}

/// Formats a float the way the distribution expects: C's `%.20e`, padded
/// with NULs to exactly 31 bytes.
pub(crate) fn format_float(v: f64) -> Result<[u8; FLOAT_DIGITS]> {
    if !v.is_finite() {
        return Err(Error::Encoding {
            term: "float",
            detail: format!("{v} has no text encoding"),
        });
    }
    // Rust prints `4.2e1`; rebuild the exponent as sign plus two digits.
    let text = format!("{:.20e}", v);
    let (mantissa, exp) = text.split_once('e').expect("{:e} always emits an exponent");
    let exp: i32 = exp.parse().expect("exponent is an integer");
    let formatted = format!("{mantissa}e{exp:+03}");

    let mut out = [0u8; FLOAT_DIGITS];
    let bytes = formatted.as_bytes();
    debug_assert!(bytes.len() <= FLOAT_DIGITS);
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

//! Erlang-style pattern matching over serialized terms.
//!
//! A [`Pattern`] mirrors the term algebra. Every leaf comes in three
//! flavours, built by the free functions of this module:
//!
//! - a **literal** (`atom("ok")`, `int(42)`) matches by equality,
//! - a **binding** (`int_bind(&capture)`) matches any value of that type
//!   and stores it in a [`Capture`] cell,
//! - a **typed wildcard** (`int_any()`) matches any value of that type and
//!   discards it.
//!
//! [`any`] matches one well-formed term of any type; [`any_bind`] also
//! records the raw bytes spanning exactly that term, so the captured value
//! can be matched again later.
//!
//! Matching advances a cursor through the serialized input and restores it
//! when a sub-pattern fails, so alternative patterns can be tried against
//! the same message. Captures may already be bound when an enclosing match
//! fails; the overall result is what counts.
//!
//! # Examples
//!
//! ```
//! use erlink::pattern::{atom, pid_bind, tuple, Capture};
//! use erlink::{Matchable, Pid, Term};
//!
//! let sender = Pid::new("peer@host", 7, 0, 1);
//! let msg = Matchable::new(
//!     Term::tuple(vec![Term::atom("hello"), Term::Pid(sender.clone())])
//!         .to_bytes()
//!         .unwrap(),
//! );
//!
//! let who = Capture::new();
//! assert!(msg.matches(&tuple(vec![atom("hello"), pid_bind(&who)])));
//! assert_eq!(who.get(), Some(sender));
//! ```

use super::decode::{
    read_atom, read_binary, read_float, read_int, read_pid, read_reference, read_string_bytes,
    read_term, Reader,
};
use super::{tag, Matchable};
use crate::core::{Binary, Pid, Reference};
use parking_lot::Mutex;
use std::sync::Arc;

/// A shared cell bound by a matching pattern.
///
/// Cloning a capture clones the handle, not the slot; all clones observe
/// the same bound value.
#[derive(Debug, Default)]
pub struct Capture<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for Capture<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Capture<T> {
    /// Creates an empty capture cell.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// Returns a copy of the bound value, if a match has bound one.
    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }

    /// Removes and returns the bound value.
    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    pub(crate) fn set(&self, value: T) {
        *self.0.lock() = Some(value);
    }
}

/// Literal / bind / wildcard mode of a typed leaf pattern.
#[derive(Debug, Clone)]
enum Slot<T> {
    Literal(T),
    Bind(Capture<T>),
    Any,
}

impl<T: Clone + PartialEq> Slot<T> {
    /// Applies the slot to a decoded value.
    fn accept(&self, value: T) -> bool {
        match self {
            Slot::Literal(expected) => *expected == value,
            Slot::Bind(cap) => {
                cap.set(value);
                true
            }
            Slot::Any => true,
        }
    }
}

/// A pattern over one term; see the [module docs](self) for the builders.
#[derive(Debug, Clone)]
pub struct Pattern {
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Int(Slot<i32>),
    Float(Slot<f64>),
    Atom(Slot<String>),
    Pid(Slot<Pid>),
    Ref(Slot<Reference>),
    Binary(Slot<Binary>),
    Str(Slot<String>),
    Tuple(Vec<Pattern>),
    List(Vec<Pattern>),
    Any(Option<Capture<Matchable>>),
}

impl Pattern {
    fn of(kind: Kind) -> Self {
        Self { kind }
    }
}

// Leaf constructors, one literal/bind/wildcard triple per type.

/// Matches the exact integer.
pub fn int(value: i32) -> Pattern {
    Pattern::of(Kind::Int(Slot::Literal(value)))
}

/// Matches any integer and binds it.
pub fn int_bind(capture: &Capture<i32>) -> Pattern {
    Pattern::of(Kind::Int(Slot::Bind(capture.clone())))
}

/// Matches any integer.
pub fn int_any() -> Pattern {
    Pattern::of(Kind::Int(Slot::Any))
}

/// Matches the exact float.
pub fn float(value: f64) -> Pattern {
    Pattern::of(Kind::Float(Slot::Literal(value)))
}

/// Matches any float and binds it.
pub fn float_bind(capture: &Capture<f64>) -> Pattern {
    Pattern::of(Kind::Float(Slot::Bind(capture.clone())))
}

/// Matches any float.
pub fn float_any() -> Pattern {
    Pattern::of(Kind::Float(Slot::Any))
}

/// Matches the exact atom.
pub fn atom(name: &str) -> Pattern {
    Pattern::of(Kind::Atom(Slot::Literal(name.to_string())))
}

/// Matches any atom and binds its name.
pub fn atom_bind(capture: &Capture<String>) -> Pattern {
    Pattern::of(Kind::Atom(Slot::Bind(capture.clone())))
}

/// Matches any atom.
pub fn atom_any() -> Pattern {
    Pattern::of(Kind::Atom(Slot::Any))
}

/// Matches the exact pid.
pub fn pid(value: &Pid) -> Pattern {
    Pattern::of(Kind::Pid(Slot::Literal(value.clone())))
}

/// Matches any pid and binds it.
pub fn pid_bind(capture: &Capture<Pid>) -> Pattern {
    Pattern::of(Kind::Pid(Slot::Bind(capture.clone())))
}

/// Matches any pid.
pub fn pid_any() -> Pattern {
    Pattern::of(Kind::Pid(Slot::Any))
}

/// Matches the exact reference.
pub fn reference(value: &Reference) -> Pattern {
    Pattern::of(Kind::Ref(Slot::Literal(value.clone())))
}

/// Matches any reference and binds it.
pub fn reference_bind(capture: &Capture<Reference>) -> Pattern {
    Pattern::of(Kind::Ref(Slot::Bind(capture.clone())))
}

/// Matches any reference.
pub fn reference_any() -> Pattern {
    Pattern::of(Kind::Ref(Slot::Any))
}

/// Matches the exact binary.
pub fn binary(value: &Binary) -> Pattern {
    Pattern::of(Kind::Binary(Slot::Literal(value.clone())))
}

/// Matches any binary or bit-string and binds it.
pub fn binary_bind(capture: &Capture<Binary>) -> Pattern {
    Pattern::of(Kind::Binary(Slot::Bind(capture.clone())))
}

/// Matches any binary or bit-string.
pub fn binary_any() -> Pattern {
    Pattern::of(Kind::Binary(Slot::Any))
}

/// Matches the exact string, in either wire form.
pub fn string(value: &str) -> Pattern {
    Pattern::of(Kind::Str(Slot::Literal(value.to_string())))
}

/// Matches any string and binds it.
pub fn string_bind(capture: &Capture<String>) -> Pattern {
    Pattern::of(Kind::Str(Slot::Bind(capture.clone())))
}

/// Matches any string.
pub fn string_any() -> Pattern {
    Pattern::of(Kind::Str(Slot::Any))
}

/// Matches a tuple whose elements match the sub-patterns in order.
pub fn tuple(elements: Vec<Pattern>) -> Pattern {
    Pattern::of(Kind::Tuple(elements))
}

/// Matches a proper list whose elements match the sub-patterns in order.
pub fn list(elements: Vec<Pattern>) -> Pattern {
    Pattern::of(Kind::List(elements))
}

/// Matches any single well-formed term.
pub fn any() -> Pattern {
    Pattern::of(Kind::Any(None))
}

/// Matches any single well-formed term and captures its raw bytes for
/// further matching.
pub fn any_bind(capture: &Capture<Matchable>) -> Pattern {
    Pattern::of(Kind::Any(Some(capture.clone())))
}

impl Pattern {
    /// The wildcard capture, when this pattern is a bare wildcard.
    ///
    /// Used by [`Matchable::matches`] to give a top-level wildcard its
    /// tolerant, best-effort behaviour.
    pub(crate) fn as_bare_any(&self) -> Option<Option<&Capture<Matchable>>> {
        match &self.kind {
            Kind::Any(cap) => Some(cap.as_ref()),
            _ => None,
        }
    }

    /// Matches this pattern at the cursor, restoring it on failure.
    pub(crate) fn match_at(&self, r: &mut Reader<'_>) -> bool {
        let start = r.pos();
        let matched = self.try_match(r);
        if !matched {
            r.set_pos(start);
        }
        matched
    }

    fn try_match(&self, r: &mut Reader<'_>) -> bool {
        match &self.kind {
            Kind::Int(slot) => read_int(r).is_some_and(|v| slot.accept(v)),
            Kind::Float(slot) => read_float(r).is_some_and(|v| slot.accept(v)),
            Kind::Atom(slot) => read_atom(r).is_some_and(|v| slot.accept(v)),
            Kind::Pid(slot) => read_pid(r).is_some_and(|v| slot.accept(v)),
            Kind::Ref(slot) => read_reference(r).is_some_and(|v| slot.accept(v)),
            Kind::Binary(slot) => read_binary(r).is_some_and(|v| slot.accept(v)),
            Kind::Str(slot) => match_string(slot, r),
            Kind::Tuple(children) => match_tuple(children, r),
            Kind::List(children) => match_list(children, r),
            Kind::Any(cap) => match_any(cap.as_ref(), r),
        }
    }
}

fn match_tuple(children: &[Pattern], r: &mut Reader<'_>) -> bool {
    if r.u8() != Some(tag::SMALL_TUPLE) {
        return false;
    }
    if r.u8() != Some(children.len() as u8) {
        return false;
    }
    children.iter().all(|child| child.match_at(r))
}

fn match_list(children: &[Pattern], r: &mut Reader<'_>) -> bool {
    match r.peek_u8() {
        Some(tag::NIL) => {
            let _ = r.u8();
            children.is_empty()
        }
        // A list of small integers may arrive in the packed string form;
        // only integer sub-patterns can match its elements.
        Some(tag::STRING) => {
            let _ = r.u8();
            let Some(len) = r.u16() else { return false };
            if len as usize != children.len() {
                return false;
            }
            children.iter().all(|child| {
                let Kind::Int(slot) = &child.kind else {
                    return false;
                };
                // Packed elements carry no per-element tag.
                r.u8().is_some_and(|b| slot.accept(i32::from(b)))
            })
        }
        Some(tag::LIST) => {
            let _ = r.u8();
            if r.u32() != Some(children.len() as u32) {
                return false;
            }
            if !children.iter().all(|child| child.match_at(r)) {
                return false;
            }
            r.u8() == Some(tag::NIL)
        }
        _ => false,
    }
}

fn match_string(slot: &Slot<String>, r: &mut Reader<'_>) -> bool {
    match r.peek_u8() {
        Some(tag::STRING) => {
            let Some(bytes) = read_string_bytes(r) else {
                return false;
            };
            let Ok(value) = String::from_utf8(bytes) else {
                return false;
            };
            slot.accept(value)
        }
        Some(tag::NIL) => {
            let _ = r.u8();
            slot.accept(String::new())
        }
        // The sender may have spelled character data out with the full
        // list encoding; accept it when every element is a small integer.
        Some(tag::LIST) => {
            let _ = r.u8();
            let Some(len) = r.u32() else { return false };
            let mut bytes = Vec::with_capacity((len as usize).min(4096));
            for _ in 0..len {
                match read_int(r) {
                    Some(v) if (0..=255).contains(&v) => bytes.push(v as u8),
                    _ => return false,
                }
            }
            if r.u8() != Some(tag::NIL) {
                return false;
            }
            let Ok(value) = String::from_utf8(bytes) else {
                return false;
            };
            slot.accept(value)
        }
        _ => false,
    }
}

fn match_any(cap: Option<&Capture<Matchable>>, r: &mut Reader<'_>) -> bool {
    let start = r.pos();
    if read_term(r).is_none() {
        // Unknown tags are a match failure, not an error.
        return false;
    }
    if let Some(cap) = cap {
        cap.set(Matchable::new(r.span(start).to_vec()));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;

    fn matchable(t: Term) -> Matchable {
        Matchable::new(t.to_bytes().unwrap())
    }

    #[test]
    fn test_tuple_capture_scenario() {
        // {ok, 42} with a leading version byte stripped by the envelope
        // parser before payloads reach a mailbox.
        let payload = [0x83, 0x68, 0x02, 0x64, 0x00, 0x02, 0x6F, 0x6B, 0x61, 0x2A];
        let msg = Matchable::new(payload[1..].to_vec());

        let n = Capture::new();
        assert!(msg.matches(&tuple(vec![atom("ok"), int_bind(&n)])));
        assert_eq!(n.get(), Some(42));
    }

    #[test]
    fn test_literal_match_per_type() {
        let p = Pid::new("n@h", 1, 0, 0);
        let rf = Reference::new("n@h", 0, vec![0, 0, 0, 1]).unwrap();
        let bin = Binary::new(vec![9, 8]);

        assert!(matchable(Term::int(-5)).matches(&int(-5)));
        assert!(matchable(Term::float(1.5)).matches(&float(1.5)));
        assert!(matchable(Term::atom("hi")).matches(&atom("hi")));
        assert!(matchable(Term::Pid(p.clone())).matches(&pid(&p)));
        assert!(matchable(Term::Ref(rf.clone())).matches(&reference(&rf)));
        assert!(matchable(Term::Binary(bin.clone())).matches(&binary(&bin)));
        assert!(matchable(Term::str("abc")).matches(&string("abc")));

        // And the corresponding mismatches.
        assert!(!matchable(Term::int(-5)).matches(&int(5)));
        assert!(!matchable(Term::atom("hi")).matches(&atom("ho")));
        assert!(!matchable(Term::atom("hi")).matches(&int(1)));
    }

    #[test]
    fn test_capture_binds_equal_value() {
        let rf = Reference::new("n@h", 2, vec![1, 2, 3, 4]).unwrap();
        let cap = Capture::new();
        assert!(matchable(Term::Ref(rf.clone())).matches(&reference_bind(&cap)));
        assert_eq!(cap.get(), Some(rf));

        let fcap = Capture::new();
        assert!(matchable(Term::float(-2.25)).matches(&float_bind(&fcap)));
        assert_eq!(fcap.get(), Some(-2.25));
    }

    #[test]
    fn test_cursor_restored_after_failed_branch() {
        let msg = matchable(Term::tuple(vec![Term::atom("b"), Term::int(1)]));

        // First alternative fails mid-tuple, second must still see the
        // message from the start.
        assert!(!msg.matches(&tuple(vec![atom("a"), int_any()])));
        assert!(msg.matches(&tuple(vec![atom("b"), int(1)])));
    }

    #[test]
    fn test_int_pattern_accepts_both_encodings() {
        assert!(matchable(Term::int(7)).matches(&int(7)));
        assert!(matchable(Term::int(7000)).matches(&int(7000)));
        let cap = Capture::new();
        assert!(matchable(Term::int(7000)).matches(&int_bind(&cap)));
        assert_eq!(cap.get(), Some(7000));
    }

    #[test]
    fn test_list_of_ints_matches_packed_form() {
        // Encoder packs [104, 105] as a string; an int-list pattern still
        // matches and binds.
        let msg = matchable(Term::list(vec![Term::int(104), Term::int(105)]));
        let a = Capture::new();
        assert!(msg.matches(&list(vec![int(104), int_bind(&a)])));
        assert_eq!(a.get(), Some(105));

        // Wrong length fails.
        assert!(!msg.matches(&list(vec![int(104)])));
        // Non-integer sub-pattern cannot match packed elements.
        assert!(!msg.matches(&list(vec![int(104), atom_any()])));
    }

    #[test]
    fn test_string_pattern_accepts_list_form() {
        // A list of small ints spelled out with the full list encoding.
        let bytes = vec![0x6C, 0x00, 0x00, 0x00, 0x02, 0x61, 0x68, 0x61, 0x69, 0x6A];
        let msg = Matchable::new(bytes);
        assert!(msg.matches(&string("hi")));

        let cap = Capture::new();
        assert!(msg.matches(&string_bind(&cap)));
        assert_eq!(cap.get(), Some("hi".to_string()));
    }

    #[test]
    fn test_heterogeneous_list() {
        let msg = matchable(Term::list(vec![Term::atom("a"), Term::int(300)]));
        assert!(msg.matches(&list(vec![atom("a"), int(300)])));
        assert!(!msg.matches(&list(vec![atom("a")])));
        assert!(matchable(Term::list(vec![])).matches(&list(vec![])));
    }

    #[test]
    fn test_any_captures_subterm_for_rematching() {
        let msg = matchable(Term::tuple(vec![
            Term::atom("reply"),
            Term::tuple(vec![Term::atom("value"), Term::int(17)]),
        ]));

        let inner = Capture::new();
        assert!(msg.matches(&tuple(vec![atom("reply"), any_bind(&inner)])));

        let payload = inner.take().expect("wildcard captured the sub-term");
        let n = Capture::new();
        assert!(payload.matches(&tuple(vec![atom("value"), int_bind(&n)])));
        assert_eq!(n.get(), Some(17));
    }

    #[test]
    fn test_any_inside_compound_rejects_unknown_tag() {
        // Map tag (116) inside a tuple: the wildcard cannot skip it.
        let bytes = vec![0x68, 0x01, 116, 0, 0, 0, 0];
        let msg = Matchable::new(bytes);
        assert!(!msg.matches(&tuple(vec![any()])));
    }

    #[test]
    fn test_bare_any_tolerates_unknown_term() {
        // As an entire pattern the wildcard is best-effort and still
        // captures the opaque bytes.
        let bytes = vec![116, 0, 0, 0, 0];
        let msg = Matchable::new(bytes.clone());
        let cap = Capture::new();
        assert!(msg.matches(&any_bind(&cap)));
        assert_eq!(cap.get().unwrap().bytes(), &bytes[..]);
    }

    #[test]
    fn test_typed_wildcards() {
        let msg = matchable(Term::tuple(vec![Term::int(1), Term::atom("x")]));
        assert!(msg.matches(&tuple(vec![int_any(), atom_any()])));
        assert!(!msg.matches(&tuple(vec![atom_any(), atom_any()])));
    }
}

//! Received-message wrapper supporting pattern matching.

use super::decode::{read_term, Reader};
use super::pattern::Pattern;

/// A received payload, held as raw term bytes until the host matches it.
///
/// `Matchable` is what [`Mailbox::receive`] returns: parsing a payload into
/// terms is deferred until a pattern is applied, and a wildcard capture
/// produces a new `Matchable` covering just the captured sub-term, ready for
/// further matching.
///
/// [`Mailbox::receive`]: crate::Mailbox::receive
///
/// # Examples
///
/// ```
/// use erlink::pattern::{atom, int_bind, tuple, Capture};
/// use erlink::{Matchable, Term};
///
/// let msg = Matchable::new(
///     Term::tuple(vec![Term::atom("ok"), Term::int(42)])
///         .to_bytes()
///         .unwrap(),
/// );
///
/// let n = Capture::new();
/// assert!(msg.matches(&tuple(vec![atom("ok"), int_bind(&n)])));
/// assert_eq!(n.get(), Some(42));
/// ```
#[derive(Debug, Clone)]
pub struct Matchable {
    bytes: Vec<u8>,
}

impl Matchable {
    /// Wraps raw term bytes (without a version prefix).
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the underlying term bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Matches the contained message against a pattern, binding any
    /// captures in it on success.
    ///
    /// Trailing bytes after the matched term are ignored. As a special
    /// case, a bare wildcard pattern accepts the whole message even when it
    /// holds a term type this codec does not parse, so unsupported terms
    /// can still be carried around opaquely.
    pub fn matches(&self, pattern: &Pattern) -> bool {
        if let Some(cap) = pattern.as_bare_any() {
            let mut r = Reader::new(&self.bytes);
            let taken = match read_term(&mut r) {
                Some(_) => self.bytes[..r.pos()].to_vec(),
                None => self.bytes.clone(),
            };
            if let Some(cap) = cap {
                cap.set(Matchable::new(taken));
            }
            return true;
        }

        let mut r = Reader::new(&self.bytes);
        pattern.match_at(&mut r)
    }

    /// Parses the full message into a [`Term`](crate::Term), when the host
    /// prefers a decoded value over pattern matching.
    pub fn to_term(&self) -> crate::Result<crate::Term> {
        crate::Term::decode(&self.bytes).map(|(t, _)| t)
    }
}

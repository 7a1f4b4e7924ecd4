//! Process identifier type.
//!
//! A [`Pid`] uniquely identifies a mailbox within a connected cluster. It
//! carries four components, matching the distribution wire format:
//!
//! - **node**: the full name (`name@host`) of the node that created it
//! - **id**: a 15-bit counter advanced for every mailbox the node creates
//! - **serial**: a 13-bit counter advanced each time `id` wraps
//! - **creation**: distinguishes pids across node restarts; assigned by the
//!   port mapper when the node registers, zero before that
//!
//! Equality is structural. Ordering is lexicographic over
//! `(node, id, serial, creation)`, which makes it a total order suitable for
//! sorted containers.

use std::fmt;

/// A process identifier.
///
/// Pids are created by the owning node ([`Node::create_mailbox`]) or decoded
/// off the wire; they are never forged by hand in normal use.
///
/// [`Node::create_mailbox`]: crate::Node::create_mailbox
///
/// # Examples
///
/// ```
/// use erlink::Pid;
///
/// let pid = Pid::new("demo@localhost", 1, 0, 0);
/// assert_eq!(pid.node(), "demo@localhost");
/// assert!(pid.is_on("demo@localhost"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid {
    /// Full name of the owning node.
    node: String,
    /// Process id within the node.
    id: u32,
    /// Wrap counter for `id`.
    serial: u32,
    /// Node incarnation, assigned at registration.
    creation: u32,
}

impl Pid {
    /// Creates a pid from its four components.
    ///
    /// Mostly useful for tests and for code that received the components
    /// out of band; pids for local mailboxes come from the node.
    pub fn new(node: impl Into<String>, id: u32, serial: u32, creation: u32) -> Self {
        Self {
            node: node.into(),
            id,
            serial,
            creation,
        }
    }

    /// Returns the full name of the node that owns this pid.
    #[inline]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Returns the process id within the owning node.
    #[inline]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Returns the wrap counter.
    #[inline]
    pub const fn serial(&self) -> u32 {
        self.serial
    }

    /// Returns the node incarnation this pid was created under.
    #[inline]
    pub const fn creation(&self) -> u32 {
        self.creation
    }

    /// Returns `true` if this pid lives on the named node.
    #[inline]
    pub fn is_on(&self, node: &str) -> bool {
        self.node == node
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pid<{}.{}.{}.{}>",
            self.node, self.id, self.serial, self.creation
        )
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.node, self.id, self.serial)
    }
}

/// Generator for locally owned pids.
///
/// The id advances per mailbox; past 15 bits it resets and the serial
/// advances (13-bit wrap), mirroring the jinterface algorithm.
#[derive(Debug)]
pub(crate) struct PidMint {
    id: u32,
    serial: u32,
}

const MAX_PID_ID: u32 = 0x7fff;
const MAX_SERIAL: u32 = 0x1fff;

impl PidMint {
    pub(crate) fn new() -> Self {
        Self { id: 1, serial: 0 }
    }

    /// Mints the next pid for `node` under the given incarnation.
    pub(crate) fn mint(&mut self, node: &str, creation: u32) -> Pid {
        let pid = Pid::new(node, self.id, self.serial, creation);

        self.id += 1;
        if self.id > MAX_PID_ID {
            self.id = 0;
            self.serial = if self.serial + 1 > MAX_SERIAL {
                0
            } else {
                self.serial + 1
            };
        }

        pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_advances_id() {
        let mut mint = PidMint::new();
        let p1 = mint.mint("a@host", 0);
        let p2 = mint.mint("a@host", 0);
        assert_eq!(p1.id(), 1);
        assert_eq!(p2.id(), 2);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_mint_wraps_id_into_serial() {
        let mut mint = PidMint {
            id: MAX_PID_ID,
            serial: 0,
        };
        let last = mint.mint("a@host", 0);
        assert_eq!(last.id(), MAX_PID_ID);

        let wrapped = mint.mint("a@host", 0);
        assert_eq!(wrapped.id(), 0);
        assert_eq!(wrapped.serial(), 1);
    }

    #[test]
    fn test_serial_wraps_to_zero() {
        let mut mint = PidMint {
            id: MAX_PID_ID,
            serial: MAX_SERIAL,
        };
        mint.mint("a@host", 0);
        let wrapped = mint.mint("a@host", 0);
        assert_eq!(wrapped.serial(), 0);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = Pid::new("a@host", 1, 5, 0);
        let b = Pid::new("a@host", 2, 0, 0);
        // id dominates serial: a < b even though a.serial > b.serial.
        assert!(a < b);

        let c = Pid::new("b@host", 0, 0, 0);
        // node name dominates everything.
        assert!(b < c);
    }

    #[test]
    fn test_creation_distinguishes_pids() {
        let p1 = Pid::new("a@host", 42, 0, 0);
        let p2 = Pid::new("a@host", 42, 0, 1);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_display() {
        let pid = Pid::new("demo@localhost", 7, 1, 2);
        assert_eq!(format!("{}", pid), "<demo@localhost.7.1>");
    }
}

//! Mailboxes: the in-process endpoints of cluster messaging.
//!
//! Each mailbox owns a pid and, optionally, a registered name. Messages
//! and broken-link notices share one FIFO wake-queue guarded by a mutex
//! and condition variable: `receive` blocks the calling thread until the
//! IO loop (or a local sender) pushes something. A broken-link entry is
//! reported as an error from `receive`, in queue position, so it always
//! precedes messages that arrived after the link broke.
//!
//! Lifetime: the host owns the mailbox; the node keeps only weak handles.
//! Dropping an unclosed mailbox closes it with reason `"normal"`. If the
//! drop happens while the thread is panicking, the close is posted to the
//! node's IO loop instead, with reason `"error"`: a destructor must not
//! raise a second failure mid-unwind.

use crate::core::Pid;
use crate::error::{Error, Result};
use crate::node::NodeInner;
use crate::term::{Matchable, Term};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One entry of the wake-queue.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// An incoming payload, kept serialized until matched.
    Message(Vec<u8>),
    /// A link to `from` broke with the given reason.
    LinkBroken { reason: String, from: Pid },
}

/// Shared state of one mailbox; the node holds this weakly.
#[derive(Debug)]
pub(crate) struct MailboxCore {
    pid: Pid,
    name: Option<String>,
    queue: Mutex<VecDeque<Delivery>>,
    wake: Condvar,
}

impl MailboxCore {
    pub(crate) fn new(pid: Pid, name: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            pid,
            name,
            queue: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn pid(&self) -> &Pid {
        &self.pid
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Enqueues an incoming payload and wakes one receiver.
    pub(crate) fn deliver_message(&self, payload: Vec<u8>) {
        self.push(Delivery::Message(payload));
    }

    /// Enqueues a broken-link notice and wakes one receiver.
    pub(crate) fn deliver_exit(&self, reason: String, from: Pid) {
        self.push(Delivery::LinkBroken { reason, from });
    }

    fn push(&self, delivery: Delivery) {
        self.queue.lock().push_back(delivery);
        self.wake.notify_one();
    }
}

/// An addressable endpoint for sending and receiving cluster messages.
///
/// Created through [`Node::create_mailbox`] or
/// [`Node::create_mailbox_named`]; valid for as long as its node exists.
///
/// [`Node::create_mailbox`]: crate::Node::create_mailbox
/// [`Node::create_mailbox_named`]: crate::Node::create_mailbox_named
///
/// # Examples
///
/// ```no_run
/// use erlink::pattern::{atom, int_bind, tuple, Capture};
/// use erlink::{Node, Term};
///
/// let node = Node::create("demo@127.0.0.1", "secret")?;
/// let mailbox = node.create_mailbox();
///
/// let n = Capture::new();
/// let msg = mailbox.receive()?;
/// if msg.matches(&tuple(vec![atom("count"), int_bind(&n)])) {
///     println!("counted {}", n.get().unwrap());
/// }
/// # erlink::Result::Ok(())
/// ```
#[derive(Debug)]
pub struct Mailbox {
    core: Arc<MailboxCore>,
    node: Arc<NodeInner>,
    closed: AtomicBool,
}

impl Mailbox {
    pub(crate) fn new(core: Arc<MailboxCore>, node: Arc<NodeInner>) -> Self {
        Self {
            core,
            node,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns this mailbox's pid.
    pub fn pid(&self) -> &Pid {
        self.core.pid()
    }

    /// Returns the registered name, if the mailbox has one.
    pub fn name(&self) -> Option<&str> {
        self.core.name()
    }

    /// Sends a message to a pid, local or remote.
    ///
    /// A connection to the pid's node is established implicitly if none
    /// exists yet.
    pub fn send(&self, to: &Pid, message: &Term) -> Result<()> {
        let payload = message.to_bytes()?;
        self.node.send_to_pid(to, payload)
    }

    /// Sends a message to a mailbox registered under `to_name` on this
    /// node. This doubles as a thread-safe queue for the host
    /// application.
    pub fn send_to_name(&self, to_name: &str, message: &Term) -> Result<()> {
        let payload = message.to_bytes()?;
        self.node.deliver_local_name(to_name, payload)
    }

    /// Sends a message to the process registered as `to_name` on the
    /// given node.
    pub fn send_reg(&self, to_name: &str, on_node: &str, message: &Term) -> Result<()> {
        let payload = message.to_bytes()?;
        self.node
            .send_to_name(self.core.pid(), to_name, on_node, payload)
    }

    /// Blocks until a message arrives, returning it for pattern matching.
    ///
    /// If a link held by this mailbox broke, the next `receive` reports it
    /// as [`Error::LinkBroken`] instead, in arrival order.
    pub fn receive(&self) -> Result<Matchable> {
        let mut queue = self.core.queue.lock();
        loop {
            if let Some(delivery) = queue.pop_front() {
                return unpack(delivery);
            }
            self.core.wake.wait(&mut queue);
        }
    }

    /// Like [`receive`](Self::receive), giving up with
    /// [`Error::ReceiveTimeout`] once `timeout` has passed.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Matchable> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.core.queue.lock();
        loop {
            if let Some(delivery) = queue.pop_front() {
                return unpack(delivery);
            }
            if self.core.wake.wait_until(&mut queue, deadline).timed_out() {
                return Err(Error::ReceiveTimeout);
            }
        }
    }

    /// Links this mailbox to another process, local or remote.
    ///
    /// If the linked process exits, the next `receive` here reports
    /// [`Error::LinkBroken`]; if this mailbox closes, the peer gets an
    /// exit signal.
    pub fn link(&self, to: &Pid) -> Result<()> {
        self.node.link(self.core.pid(), to)
    }

    /// Removes a link set up with [`link`](Self::link).
    pub fn unlink(&self, to: &Pid) -> Result<()> {
        self.node.unlink(self.core.pid(), to)
    }

    /// Closes this mailbox: breaks its links with reason `"normal"` and
    /// removes its registrations. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.node
            .close_mailbox(self.core.pid(), self.core.name(), "normal", true);
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if std::thread::panicking() {
            // Mid-unwind the close must not raise; hand it to the IO loop.
            self.node.close_mailbox_deferred(
                self.core.pid().clone(),
                self.core.name().map(str::to_string),
            );
        } else {
            self.node
                .close_mailbox(self.core.pid(), self.core.name(), "normal", true);
        }
    }
}

fn unpack(delivery: Delivery) -> Result<Matchable> {
    match delivery {
        Delivery::Message(payload) => Ok(Matchable::new(payload)),
        Delivery::LinkBroken { reason, from } => Err(Error::LinkBroken { reason, pid: from }),
    }
}

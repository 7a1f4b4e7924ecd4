//! Join an Erlang/OTP cluster from Rust.
//!
//! `erlink` lets a Rust process participate as a *hidden node* in a
//! distributed Erlang system: it registers with the port mapper daemon,
//! performs the distribution handshake (cookie-based MD5
//! challenge/response), and exchanges terms with remote processes through
//! mailboxes with location-transparent send, blocking pattern-matched
//! receive, and bidirectional links with exit-signal propagation.
//!
//! # Quick tour
//!
//! ```no_run
//! use erlink::pattern::{atom, pid_bind, tuple, Capture};
//! use erlink::{Node, Term};
//!
//! // One node per application, identified by name and cookie.
//! let node = Node::create("rustnode@127.0.0.1", "secret")?;
//! node.publish_port(9000)?;
//!
//! // Mailboxes are the endpoints of all messaging.
//! let mailbox = node.create_mailbox_named("logger")?;
//!
//! // Receive blocks until a message arrives, then pattern-match it.
//! let msg = mailbox.receive()?;
//! let sender = Capture::new();
//! if msg.matches(&tuple(vec![atom("register"), pid_bind(&sender)])) {
//!     let peer = sender.get().unwrap();
//!     mailbox.send(&peer, &Term::atom("registered"))?;
//!     mailbox.link(&peer)?;
//! }
//! # erlink::Result::Ok(())
//! ```
//!
//! # Concurrency model
//!
//! Each [`Node`] owns a background tokio runtime with a single worker
//! driving all sockets; host threads use the synchronous `Node` and
//! [`Mailbox`] APIs concurrently. [`Mailbox::receive`] blocks its calling
//! thread until the IO loop delivers a message or a broken-link notice.

mod core;
mod dist;
mod epmd;
mod error;
mod links;
mod mailbox;
mod node;
mod rpc;
mod term;

pub use crate::core::{Binary, Pid, Reference};
pub use crate::error::{Error, Result};
pub use crate::mailbox::Mailbox;
pub use crate::node::Node;
pub use crate::rpc::Rpc;
pub use crate::term::{pattern, Matchable, Term};

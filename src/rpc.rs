//! Remote procedure calls against Erlang nodes.
//!
//! A convenience layer over a private mailbox: `rpc:call/4`-style requests
//! go to the `rex` server on the remote node, which runs the function and
//! sends the result back.
//!
//! The rpc protocol assumes the remote node is a full Erlang node; calling
//! into another hidden node gives unpredictable results.

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::node::Node;
use crate::term::pattern::{any_bind, atom, tuple, Capture};
use crate::term::{Matchable, Term};
use std::time::Duration;

/// A remote procedure call client bound to one node.
///
/// # Examples
///
/// ```no_run
/// use erlink::{Node, Rpc, Term};
///
/// let node = Node::create("rustnode@127.0.0.1", "secret")?;
/// let rpc = Rpc::new(&node);
///
/// // erlang:node() on the peer.
/// let reply = rpc.call("othernode@127.0.0.1", "erlang", "node", vec![])?;
/// println!("peer identifies as {:?}", reply.to_term()?);
/// # erlink::Result::Ok(())
/// ```
#[derive(Debug)]
pub struct Rpc {
    mailbox: Mailbox,
}

impl Rpc {
    /// Creates an rpc client with its own reply mailbox on `node`.
    pub fn new(node: &Node) -> Self {
        Self {
            mailbox: node.create_mailbox(),
        }
    }

    /// Invokes `module:function(args)` on the remote node, blocking until
    /// the reply arrives.
    pub fn call(
        &self,
        remote_node: &str,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> Result<Matchable> {
        self.request(remote_node, module, function, args)?;
        let reply = self.mailbox.receive()?;
        unwrap_reply(reply, remote_node, module, function)
    }

    /// Like [`call`](Self::call), giving up after `timeout`.
    pub fn call_timeout(
        &self,
        remote_node: &str,
        module: &str,
        function: &str,
        args: Vec<Term>,
        timeout: Duration,
    ) -> Result<Matchable> {
        self.request(remote_node, module, function, args)?;
        let reply = self.mailbox.receive_timeout(timeout)?;
        unwrap_reply(reply, remote_node, module, function)
    }

    fn request(
        &self,
        remote_node: &str,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> Result<()> {
        // {Self, {call, Module, Function, Args, user}}
        let call = Term::tuple(vec![
            Term::atom("call"),
            Term::atom(module),
            Term::atom(function),
            Term::list(args),
            Term::atom("user"),
        ]);
        let request = Term::tuple(vec![Term::Pid(self.mailbox.pid().clone()), call]);

        self.mailbox.send_reg("rex", remote_node, &request)
    }
}

/// Replies arrive as `{rex, Result}`; anything else is a protocol error.
fn unwrap_reply(
    reply: Matchable,
    remote_node: &str,
    module: &str,
    function: &str,
) -> Result<Matchable> {
    let result = Capture::new();
    if !reply.matches(&tuple(vec![atom("rex"), any_bind(&result)])) {
        return Err(Error::Protocol(format!(
            "unexpected rpc reply from {remote_node} for {module}:{function}"
        )));
    }
    Ok(result.take().expect("bound on successful match"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_reply_extracts_result() {
        let reply = Matchable::new(
            Term::tuple(vec![
                Term::atom("rex"),
                Term::tuple(vec![Term::atom("ok"), Term::int(3)]),
            ])
            .to_bytes()
            .unwrap(),
        );

        let result = unwrap_reply(reply, "peer@host", "lists", "sum").unwrap();
        assert!(result.matches(&tuple(vec![
            atom("ok"),
            crate::term::pattern::int(3)
        ])));
    }

    #[test]
    fn test_unwrap_reply_rejects_other_shapes() {
        let reply = Matchable::new(Term::atom("nope").to_bytes().unwrap());
        assert!(unwrap_reply(reply, "peer@host", "m", "f").is_err());
    }
}

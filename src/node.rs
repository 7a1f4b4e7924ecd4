//! The node: composition root of the runtime.
//!
//! A [`Node`] owns the background IO runtime, the port mapper
//! registration, the connection registry, the mailbox registries, the link
//! graph and the pid generator. Host threads call its synchronous API; a
//! single-worker tokio runtime drives every socket, so completions on one
//! connection never race each other.
//!
//! Connections are established either explicitly (pinging a peer) or
//! implicitly by the first message sent towards a node, and accepted from
//! peers once [`Node::publish_port`] has registered a listen port.

use crate::core::{NodeName, Pid, PidMint};
use crate::dist::connection::{self, Connection};
use crate::dist::control::{self, ControlMessage};
use crate::dist::framer::{Framer, Prefix};
use crate::dist::handshake::{self, HandshakeContext};
use crate::epmd;
use crate::error::{Error, Result};
use crate::links::LinkGraph;
use crate::mailbox::{Mailbox, MailboxCore};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};

/// A distributed node: one participant in the cluster.
///
/// # Examples
///
/// ```no_run
/// use erlink::{Node, Term};
///
/// let node = Node::create("rustnode@127.0.0.1", "secret")?;
/// node.publish_port(9000)?;
///
/// let mailbox = node.create_mailbox();
/// mailbox.send_reg(
///     "shell",
///     "othernode@127.0.0.1",
///     &Term::tuple(vec![Term::atom("hello"), Term::Pid(mailbox.pid().clone())]),
/// )?;
/// # erlink::Result::Ok(())
/// ```
#[derive(Debug)]
pub struct Node {
    inner: Arc<NodeInner>,
    // Owns the IO loop; dropping the node shuts it down.
    _runtime: tokio::runtime::Runtime,
}

impl Node {
    /// Creates a node with the given `name@host` identifier and cookie.
    ///
    /// Typically the first call in an application using this crate. The
    /// port mapper is expected at its default address.
    pub fn create(name: &str, cookie: &str) -> Result<Self> {
        let epmd_addr = SocketAddr::from(([127, 0, 0, 1], epmd::DEFAULT_PORT));
        Self::create_with_epmd(name, cookie, epmd_addr)
    }

    /// Creates a node that talks to a port mapper at a non-default
    /// address. The port also applies to lookups on peer hosts.
    pub fn create_with_epmd(name: &str, cookie: &str, epmd_addr: SocketAddr) -> Result<Self> {
        let node_name = NodeName::parse(name)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("erlink-io")
            .enable_all()
            .build()?;

        let inner = Arc::new(NodeInner {
            node_name,
            cookie: cookie.to_string(),
            handle: runtime.handle().clone(),
            epmd_addr,
            creation: AtomicU32::new(0),
            registration: Mutex::new(None),
            pids: Mutex::new(PidMint::new()),
            mailboxes: Mutex::new(MailboxRegistry::default()),
            connections: DashMap::new(),
            dial_lock: tokio::sync::Mutex::new(()),
            links: LinkGraph::new(),
        });

        Ok(Self {
            inner,
            _runtime: runtime,
        })
    }

    /// Returns this node's full `name@host` identifier.
    pub fn name(&self) -> &str {
        self.inner.node_name.full()
    }

    /// Registers this node at the port mapper and starts accepting
    /// incoming connections on `port`.
    ///
    /// Required for other nodes to connect to this one; outgoing traffic
    /// works without it.
    pub fn publish_port(&self, port: u16) -> Result<()> {
        let registration = epmd::register(self.inner.epmd_addr, self.inner.node_name.name(), port)?;
        self.inner
            .creation
            .store(u32::from(registration.creation), Ordering::SeqCst);
        *self.inner.registration.lock() = Some(registration);

        let listener = self
            .inner
            .handle
            .block_on(TcpListener::bind(("0.0.0.0", port)))?;

        let inner = self.inner.clone();
        self.inner.handle.spawn(accept_loop(inner, listener));
        Ok(())
    }

    /// Attempts to establish a connection to the given peer, returning
    /// `true` if the peer answered the handshake.
    ///
    /// Connections are also established implicitly by the first message
    /// sent to a node; a failed attempt here is not an error.
    pub fn ping(&self, peer_node: &str) -> bool {
        let inner = self.inner.clone();
        let peer = peer_node.to_string();
        self.inner
            .handle
            .block_on(async move { inner.ensure_connection(&peer).await })
            .is_ok()
    }

    /// Creates an unnamed mailbox.
    pub fn create_mailbox(&self) -> Mailbox {
        let pid = self.inner.mint_pid();
        let core = MailboxCore::new(pid, None);
        self.inner.register_unnamed(&core);
        Mailbox::new(core, self.inner.clone())
    }

    /// Creates a mailbox that is also reachable by a registered name.
    ///
    /// Fails if a live mailbox already holds the name.
    pub fn create_mailbox_named(&self, name: &str) -> Result<Mailbox> {
        let pid = self.inner.mint_pid();
        let core = MailboxCore::new(pid, Some(name.to_string()));
        self.inner.register_mailbox(&core)?;
        Ok(Mailbox::new(core, self.inner.clone()))
    }

    /// Returns the names of all currently connected nodes.
    pub fn connected_nodes(&self) -> Vec<String> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Weak mailbox registries: the host owns mailboxes, the node only finds
/// them. Dead entries are evicted lazily on lookup.
#[derive(Debug, Default)]
struct MailboxRegistry {
    by_pid: HashMap<Pid, Weak<MailboxCore>>,
    by_name: HashMap<String, Weak<MailboxCore>>,
}

#[derive(Debug)]
pub(crate) struct NodeInner {
    node_name: NodeName,
    cookie: String,
    handle: tokio::runtime::Handle,
    epmd_addr: SocketAddr,
    /// Incarnation from EPMD; zero until the node is published.
    creation: AtomicU32,
    /// Keeps the ALIVE2 socket open for the node's lifetime.
    registration: Mutex<Option<epmd::Registration>>,
    pids: Mutex<PidMint>,
    mailboxes: Mutex<MailboxRegistry>,
    connections: DashMap<String, Connection>,
    /// Serializes outgoing dials so concurrent sends to a new peer run
    /// one handshake, not several.
    dial_lock: tokio::sync::Mutex<()>,
    links: LinkGraph,
}

impl NodeInner {
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    fn full_name(&self) -> &str {
        self.node_name.full()
    }

    fn mint_pid(&self) -> Pid {
        self.pids
            .lock()
            .mint(self.full_name(), self.creation.load(Ordering::SeqCst))
    }

    fn register_mailbox(&self, core: &Arc<MailboxCore>) -> Result<()> {
        let mut registry = self.mailboxes.lock();
        if let Some(name) = core.name() {
            if upgrade_or_evict(&mut registry.by_name, &name.to_string()).is_some() {
                return Err(Error::Protocol(format!(
                    "mailbox name {name:?} is already registered"
                )));
            }
            registry
                .by_name
                .insert(name.to_string(), Arc::downgrade(core));
        }
        registry
            .by_pid
            .insert(core.pid().clone(), Arc::downgrade(core));
        Ok(())
    }

    fn register_unnamed(&self, core: &Arc<MailboxCore>) {
        self.mailboxes
            .lock()
            .by_pid
            .insert(core.pid().clone(), Arc::downgrade(core));
    }

    fn lookup_pid(&self, pid: &Pid) -> Option<Arc<MailboxCore>> {
        upgrade_or_evict(&mut self.mailboxes.lock().by_pid, pid)
    }

    // -------------------------------------------------------------
    // Outgoing traffic (host threads)
    // -------------------------------------------------------------

    /// Delivers a serialized message to a pid, dialling its node first if
    /// necessary.
    pub(crate) fn send_to_pid(self: &Arc<Self>, to: &Pid, payload: Vec<u8>) -> Result<()> {
        if to.is_on(self.full_name()) {
            return self.deliver_local_pid(to, payload);
        }
        let conn = self.connection_or_dial(to.node())?;
        conn.send_frame(control::send_frame(to, &payload))
    }

    /// Delivers a serialized message to a registered name, locally or on
    /// a remote node.
    pub(crate) fn send_to_name(
        self: &Arc<Self>,
        from: &Pid,
        to_name: &str,
        on_node: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        if on_node == self.full_name() {
            return self.deliver_local_name(to_name, payload);
        }
        let conn = self.connection_or_dial(on_node)?;
        conn.send_frame(control::reg_send_frame(from, to_name, &payload))
    }

    pub(crate) fn deliver_local_pid(&self, to: &Pid, payload: Vec<u8>) -> Result<()> {
        let mut registry = self.mailboxes.lock();
        let core = upgrade_or_evict(&mut registry.by_pid, to)
            .ok_or_else(|| Error::DeliveryFailure(to.to_string()))?;
        core.deliver_message(payload);
        Ok(())
    }

    pub(crate) fn deliver_local_name(&self, to_name: &str, payload: Vec<u8>) -> Result<()> {
        let mut registry = self.mailboxes.lock();
        let core = upgrade_or_evict(&mut registry.by_name, &to_name.to_string())
            .ok_or_else(|| Error::DeliveryFailure(to_name.to_string()))?;
        core.deliver_message(payload);
        Ok(())
    }

    /// Links `from` (a local mailbox) to `to`. Remote targets also get a
    /// LINK control message.
    pub(crate) fn link(self: &Arc<Self>, from: &Pid, to: &Pid) -> Result<()> {
        if to.is_on(self.full_name()) {
            self.links.link(from.clone(), to.clone());
            return Ok(());
        }
        let conn = self.connection_or_dial(to.node())?;
        self.links.link(from.clone(), to.clone());
        conn.send_frame(control::link_frame(from, to))
    }

    /// Removes a link; remote targets also get an UNLINK control message.
    pub(crate) fn unlink(self: &Arc<Self>, from: &Pid, to: &Pid) -> Result<()> {
        self.links.unlink(from, to);
        if to.is_on(self.full_name()) {
            return Ok(());
        }
        let conn = self.connection_or_dial(to.node())?;
        conn.send_frame(control::unlink_frame(from, to))
    }

    /// Breaks all links of a closing mailbox and removes its
    /// registrations.
    ///
    /// A controlled close sends EXIT2, an uncontrolled one (mailbox torn
    /// down during a failure) sends EXIT.
    pub(crate) fn close_mailbox(
        &self,
        pid: &Pid,
        name: Option<&str>,
        reason: &str,
        controlled: bool,
    ) {
        // Break links before touching the registry: a link to a local
        // mailbox re-enters the delivery path.
        for peer in self.links.take_links_for(pid) {
            if peer.is_on(self.full_name()) {
                if let Some(core) = self.lookup_pid(&peer) {
                    core.deliver_exit(reason.to_string(), pid.clone());
                }
            } else if let Some(conn) = self.connections.get(peer.node()) {
                let frame = if controlled {
                    control::exit2_frame(pid, &peer, reason)
                } else {
                    control::exit_frame(pid, &peer, reason)
                };
                let _ = conn.send_frame(frame);
            } else {
                tracing::debug!(
                    peer = %peer,
                    "no connection to signal exit of a linked process"
                );
            }
        }

        let mut registry = self.mailboxes.lock();
        registry.by_pid.remove(pid);
        if let Some(name) = name {
            registry.by_name.remove(name);
        }
    }

    /// Posts the close to the IO loop; used when the mailbox is dropped
    /// mid-unwind and the close must not raise.
    pub(crate) fn close_mailbox_deferred(self: &Arc<Self>, pid: Pid, name: Option<String>) {
        let inner = self.clone();
        self.handle.spawn(async move {
            inner.close_mailbox(&pid, name.as_deref(), "error", false);
        });
    }

    // -------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------

    fn connection_or_dial(self: &Arc<Self>, peer: &str) -> Result<Connection> {
        if let Some(conn) = self.connections.get(peer) {
            return Ok(conn.clone());
        }
        let inner = self.clone();
        let peer = peer.to_string();
        self.handle
            .block_on(async move { inner.ensure_connection(&peer).await })
    }

    /// Dials, authenticates and registers a connection to `peer`, or
    /// returns the existing one.
    pub(crate) async fn ensure_connection(self: &Arc<Self>, peer: &str) -> Result<Connection> {
        if let Some(conn) = self.connections.get(peer) {
            return Ok(conn.clone());
        }

        let _dialing = self.dial_lock.lock().await;
        if let Some(conn) = self.connections.get(peer) {
            return Ok(conn.clone());
        }

        let peer_name = NodeName::parse(peer)?;
        let host = peer_name.host().to_string();
        let short_name = peer_name.name().to_string();
        let epmd_port = self.epmd_addr.port();

        // Port mapper lookups are synchronous one-shot sockets; keep them
        // off the IO worker.
        let port = tokio::task::spawn_blocking(move || -> Result<u16> {
            let addr = (host.as_str(), epmd_port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Error::Protocol(format!("cannot resolve host {host}")))?;
            epmd::lookup_port(addr, &short_name)
        })
        .await
        .map_err(|e| Error::Protocol(format!("port lookup task failed: {e}")))??;

        let mut stream = TcpStream::connect((peer_name.host(), port)).await?;

        let ctx = HandshakeContext {
            local_node: self.full_name().to_string(),
            cookie: self.cookie.clone(),
            challenge: handshake::generate_challenge(),
        };
        let mut framer = Framer::new(Prefix::Handshake);
        handshake::initiate(&mut stream, &mut framer, &ctx).await?;
        framer.set_prefix(Prefix::Connected);

        let conn = connection::spawn(self.clone(), stream, framer, peer.to_string());
        self.connections.insert(peer.to_string(), conn.clone());
        tracing::info!(peer, "connected");
        Ok(conn)
    }

    /// Evicts a failed connection and signals local mailboxes that were
    /// linked across it with reason `"noconnection"`.
    pub(crate) fn drop_connection(&self, peer: &str) {
        if self.connections.remove(peer).is_none() {
            return;
        }
        tracing::warn!(peer, "connection dropped");

        for (a, b) in self.links.take_links_to_node(peer) {
            let (remote, local) = if a.is_on(peer) { (a, b) } else { (b, a) };
            if !local.is_on(self.full_name()) {
                continue;
            }
            if let Some(core) = self.lookup_pid(&local) {
                core.deliver_exit("noconnection".to_string(), remote);
            }
        }
    }

    // -------------------------------------------------------------
    // Incoming traffic (IO loop)
    // -------------------------------------------------------------

    /// Dispatches one received control message.
    pub(crate) fn handle_frame(&self, peer: &str, frame: &[u8]) -> Result<()> {
        match ControlMessage::parse(frame)? {
            ControlMessage::Send { to, payload } => {
                tracing::trace!(peer, to = %to, "send");
                self.deliver_local_pid(&to, payload)
            }
            ControlMessage::RegSend {
                from: _,
                to_name,
                payload,
            } => {
                tracing::trace!(peer, %to_name, "reg_send");
                self.deliver_local_name(&to_name, payload)
            }
            ControlMessage::Link { from, to } => {
                tracing::debug!(peer, from = %from, to = %to, "link");
                self.links.link(from, to);
                Ok(())
            }
            ControlMessage::Unlink { from, to } => {
                tracing::debug!(peer, from = %from, to = %to, "unlink");
                self.links.unlink(&from, &to);
                Ok(())
            }
            // A termination and a controlled shutdown arrive differently
            // but land in the mailbox the same way.
            ControlMessage::Exit { from, to, reason }
            | ControlMessage::Exit2 { from, to, reason } => {
                tracing::debug!(peer, from = %from, to = %to, %reason, "exit");
                self.incoming_exit(from, &to, reason)
            }
        }
    }

    fn incoming_exit(&self, from: Pid, to: &Pid, reason: String) -> Result<()> {
        self.links.unlink(&from, to);
        let core = self
            .lookup_pid(to)
            .ok_or_else(|| Error::DeliveryFailure(to.to_string()))?;
        core.deliver_exit(reason, from);
        Ok(())
    }
}

fn upgrade_or_evict<K>(
    map: &mut HashMap<K, Weak<MailboxCore>>,
    key: &K,
) -> Option<Arc<MailboxCore>>
where
    K: std::hash::Hash + Eq,
{
    match map.get(key) {
        Some(weak) => match weak.upgrade() {
            Some(core) => Some(core),
            None => {
                // The host dropped its last handle; forget the entry.
                map.remove(key);
                None
            }
        },
        None => None,
    }
}

async fn accept_loop(inner: Arc<NodeInner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(%addr, "incoming connection");
                let inner = inner.clone();
                tokio::spawn(async move {
                    handle_incoming(inner, stream).await;
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
            }
        }
    }
}

async fn handle_incoming(inner: Arc<NodeInner>, mut stream: TcpStream) {
    let ctx = HandshakeContext {
        local_node: inner.full_name().to_string(),
        cookie: inner.cookie.clone(),
        challenge: handshake::generate_challenge(),
    };
    let mut framer = Framer::new(Prefix::Handshake);

    match handshake::accept(&mut stream, &mut framer, &ctx).await {
        Ok(peer) => {
            framer.set_prefix(Prefix::Connected);
            let conn = connection::spawn(inner.clone(), stream, framer, peer.clone());
            inner.connections.insert(peer.clone(), conn);
            tracing::info!(peer, "accepted connection");
        }
        Err(err) => {
            // The peer never made it into the registry.
            tracing::warn!(error = %err, "incoming handshake failed");
        }
    }
}

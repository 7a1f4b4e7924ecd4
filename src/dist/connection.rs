//! Established connections: one reader and one writer task per peer.
//!
//! The writer drains a FIFO channel, so frames reach the wire in the order
//! they were queued. The reader feeds the framer, answers keep-alive ticks,
//! and hands every other frame to the node's dispatcher. Socket errors on
//! either side evict the connection from the node's registry; per-frame
//! protocol errors are logged and reading continues.

use super::framer::Framer;
use crate::error::{Error, Result};
use crate::node::NodeInner;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Handle to an established connection; cheap to clone.
///
/// Dropping every handle does not close the socket; eviction from the
/// node's registry stops the writer by closing the channel.
#[derive(Debug, Clone)]
pub(crate) struct Connection {
    peer: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Connection {
    /// Queues one frame for writing; completes in queue order.
    pub(crate) fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::Protocol(format!("connection to {} is down", self.peer)))
    }
}

/// Spawns the reader/writer pair for an authenticated stream.
///
/// `framer` carries over any bytes the peer pipelined behind the handshake
/// and must already be switched to the connected (4-byte) prefix.
pub(crate) fn spawn(
    node: Arc<NodeInner>,
    stream: TcpStream,
    framer: Framer,
    peer: String,
) -> Connection {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let connection = Connection {
        peer: peer.clone(),
        tx: tx.clone(),
    };

    node.spawn(writer_loop(node.clone(), write_half, rx, peer.clone()));
    node.spawn(reader_loop(node.clone(), read_half, framer, tx, peer));

    connection
}

async fn writer_loop(
    node: Arc<NodeInner>,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    peer: String,
) {
    while let Some(frame) = rx.recv().await {
        let write = async {
            write_half.write_u32(frame.len() as u32).await?;
            write_half.write_all(&frame).await
        };
        if let Err(source) = write.await {
            let err = Error::ConnectionIo {
                peer: peer.clone(),
                source,
            };
            tracing::warn!(error = %err, "dropping connection");
            node.drop_connection(&peer);
            return;
        }
    }
    // Channel closed: the connection was evicted; let the socket drop.
}

async fn reader_loop(
    node: Arc<NodeInner>,
    mut read_half: OwnedReadHalf,
    mut framer: Framer,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    peer: String,
) {
    let mut chunk = BytesMut::with_capacity(8 * 1024);

    loop {
        while let Some(frame) = framer.next_frame() {
            if frame.is_empty() {
                // Tick: answer with a tock, never surface it.
                tracing::trace!(peer = %peer, "tick");
                let _ = tx.send(Vec::new());
                continue;
            }
            if let Err(err) = node.handle_frame(&peer, &frame) {
                // Best effort: a frame we can't handle doesn't kill the
                // connection, the next read is re-armed regardless.
                tracing::warn!(peer = %peer, error = %err, "discarding frame");
            }
        }

        chunk.clear();
        match read_half.read_buf(&mut chunk).await {
            Ok(0) => {
                tracing::info!(peer = %peer, "peer closed the connection");
                break;
            }
            Ok(_) => framer.feed(&chunk),
            Err(source) => {
                let err = Error::ConnectionIo {
                    peer: peer.clone(),
                    source,
                };
                tracing::warn!(error = %err, "dropping connection");
                break;
            }
        }
    }

    node.drop_connection(&peer);
}

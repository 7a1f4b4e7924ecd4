//! The per-peer distribution handshake.
//!
//! Both roles are explicit state machines with a pure transition function:
//! feed in the peer's next frame, get back the successor state and any
//! frames to send. The async drivers at the bottom loop the machines over a
//! real stream through the 2-byte [`Framer`]. Keeping the transitions pure
//! makes the whole exchange testable without sockets.
//!
//! Message layouts (after the 2-byte length prefix):
//!
//! ```text
//! name:       'n' version:u16 flags:u32 name
//! status:     's' status-text
//! challenge:  'n' version:u16 flags:u32 challenge:u32 name
//! reply:      'r' challenge:u32 digest[16]
//! ack:        'a' digest[16]
//! ```
//!
//! The digest is MD5 over the cookie bytes followed by the challenge in
//! ASCII decimal. Challenges are drawn from `thread_rng` but bounded to 24
//! bits, following long-standing practice among non-BEAM implementations;
//! that is weaker than a full 32-bit nonce and accepted for the sake of
//! interoperability.

use super::framer::{Framer, Prefix};
use crate::error::{Error, Result};
use bytes::BufMut;
use md5::{Digest as _, Md5};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The distribution protocol version spoken here (R6B and later).
pub(crate) const VERSION: u16 = 5;

/// Capability bits advertised during the handshake.
pub(crate) const FLAG_EXTENDED_REFERENCES: u32 = 4;
pub(crate) const FLAG_EXTENDED_PIDS_PORTS: u32 = 0x100;
pub(crate) const FLAG_BIT_BINARIES: u32 = 0x400;

pub(crate) const CAPABILITIES: u32 =
    FLAG_EXTENDED_REFERENCES | FLAG_EXTENDED_PIDS_PORTS | FLAG_BIT_BINARIES;

pub(crate) const DIGEST_LEN: usize = 16;

pub(crate) type HandshakeDigest = [u8; DIGEST_LEN];

/// MD5 over the cookie followed by the challenge as decimal text.
pub(crate) fn challenge_digest(cookie: &str, challenge: u32) -> HandshakeDigest {
    let mut md5 = Md5::new();
    md5.update(cookie.as_bytes());
    md5.update(challenge.to_string().as_bytes());
    md5.finalize().into()
}

/// Draws a fresh challenge for one connection attempt.
pub(crate) fn generate_challenge() -> u32 {
    rand::thread_rng().gen_range(0..=0xFF_FFFF)
}

/// Identity and secrets a handshake runs with.
#[derive(Debug, Clone)]
pub(crate) struct HandshakeContext {
    pub(crate) local_node: String,
    pub(crate) cookie: String,
    /// Our challenge for the peer, fixed for the whole attempt.
    pub(crate) challenge: u32,
}

// ---------------------------------------------------------------------
// Frame encoding and parsing
// ---------------------------------------------------------------------

fn encode_name(local_node: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7 + local_node.len());
    buf.put_u8(b'n');
    buf.put_u16(VERSION);
    buf.put_u32(CAPABILITIES);
    buf.extend_from_slice(local_node.as_bytes());
    buf
}

fn parse_name(frame: &[u8]) -> Result<(u16, u32, String)> {
    if frame.len() < 7 || frame[0] != b'n' {
        return Err(Error::HandshakeFailure("malformed name message".into()));
    }
    let version = u16::from_be_bytes([frame[1], frame[2]]);
    let flags = u32::from_be_bytes([frame[3], frame[4], frame[5], frame[6]]);
    let name = String::from_utf8(frame[7..].to_vec())
        .map_err(|_| Error::HandshakeFailure("peer name is not valid text".into()))?;
    Ok((version, flags, name))
}

fn encode_status_ok() -> Vec<u8> {
    let mut buf = vec![b's'];
    buf.extend_from_slice(b"ok");
    buf
}

fn parse_status(frame: &[u8]) -> Result<&str> {
    if frame.first() != Some(&b's') {
        return Err(Error::HandshakeFailure("malformed status message".into()));
    }
    std::str::from_utf8(&frame[1..])
        .map_err(|_| Error::HandshakeFailure("status is not valid text".into()))
}

fn encode_challenge(challenge: u32, local_node: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11 + local_node.len());
    buf.put_u8(b'n');
    buf.put_u16(VERSION);
    buf.put_u32(CAPABILITIES);
    buf.put_u32(challenge);
    buf.extend_from_slice(local_node.as_bytes());
    buf
}

fn parse_challenge(frame: &[u8]) -> Result<(u32, String)> {
    if frame.len() < 11 || frame[0] != b'n' {
        return Err(Error::HandshakeFailure("malformed challenge message".into()));
    }
    let challenge = u32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]]);
    let name = String::from_utf8(frame[11..].to_vec())
        .map_err(|_| Error::HandshakeFailure("peer name is not valid text".into()))?;
    Ok((challenge, name))
}

fn encode_challenge_reply(challenge: u32, digest: &HandshakeDigest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + DIGEST_LEN);
    buf.put_u8(b'r');
    buf.put_u32(challenge);
    buf.extend_from_slice(digest);
    buf
}

fn parse_challenge_reply(frame: &[u8]) -> Result<(u32, HandshakeDigest)> {
    if frame.len() != 5 + DIGEST_LEN || frame[0] != b'r' {
        return Err(Error::HandshakeFailure("malformed challenge reply".into()));
    }
    let challenge = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&frame[5..]);
    Ok((challenge, digest))
}

fn encode_challenge_ack(digest: &HandshakeDigest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + DIGEST_LEN);
    buf.put_u8(b'a');
    buf.extend_from_slice(digest);
    buf
}

fn parse_challenge_ack(frame: &[u8]) -> Result<HandshakeDigest> {
    if frame.len() != 1 + DIGEST_LEN || frame[0] != b'a' {
        return Err(Error::HandshakeFailure("malformed challenge ack".into()));
    }
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&frame[1..]);
    Ok(digest)
}

// ---------------------------------------------------------------------
// State machines
// ---------------------------------------------------------------------

/// States of the connecting side (role A).
///
/// The opening name message is produced by [`Initiator::start`]; every
/// later transition consumes one peer frame.
#[derive(Debug)]
pub(crate) enum Initiator {
    AwaitStatus,
    AwaitChallenge,
    AwaitAck { expected: HandshakeDigest },
    Connected,
    Failed(String),
}

impl Initiator {
    /// Returns the initial state and the name frame to send.
    pub(crate) fn start(ctx: &HandshakeContext) -> (Self, Vec<u8>) {
        (Initiator::AwaitStatus, encode_name(&ctx.local_node))
    }

    /// Consumes one peer frame; returns the next state and frames to send.
    pub(crate) fn next(self, frame: &[u8], ctx: &HandshakeContext) -> (Self, Vec<Vec<u8>>) {
        match self {
            Initiator::AwaitStatus => match parse_status(frame) {
                Ok("ok") | Ok("ok_simultaneous") => (Initiator::AwaitChallenge, Vec::new()),
                Ok(status) => (
                    Initiator::Failed(format!("peer refused the connection: status {status:?}")),
                    Vec::new(),
                ),
                Err(e) => (Initiator::Failed(e.to_string()), Vec::new()),
            },
            Initiator::AwaitChallenge => match parse_challenge(frame) {
                Ok((peer_challenge, _peer_name)) => {
                    let reply = encode_challenge_reply(
                        ctx.challenge,
                        &challenge_digest(&ctx.cookie, peer_challenge),
                    );
                    (
                        Initiator::AwaitAck {
                            expected: challenge_digest(&ctx.cookie, ctx.challenge),
                        },
                        vec![reply],
                    )
                }
                Err(e) => (Initiator::Failed(e.to_string()), Vec::new()),
            },
            Initiator::AwaitAck { expected } => match parse_challenge_ack(frame) {
                Ok(digest) if digest == expected => (Initiator::Connected, Vec::new()),
                Ok(_) => (
                    Initiator::Failed("peer sent a wrong digest; check the cookies".into()),
                    Vec::new(),
                ),
                Err(e) => (Initiator::Failed(e.to_string()), Vec::new()),
            },
            done @ (Initiator::Connected | Initiator::Failed(_)) => (done, Vec::new()),
        }
    }
}

/// States of the accepting side (role B).
#[derive(Debug)]
pub(crate) enum Responder {
    AwaitName,
    AwaitReply {
        peer: String,
        expected: HandshakeDigest,
    },
    Connected {
        peer: String,
    },
    Failed(String),
}

impl Responder {
    pub(crate) fn start() -> Self {
        Responder::AwaitName
    }

    /// Consumes one peer frame; returns the next state and frames to send.
    pub(crate) fn next(self, frame: &[u8], ctx: &HandshakeContext) -> (Self, Vec<Vec<u8>>) {
        match self {
            Responder::AwaitName => match parse_name(frame) {
                Ok((version, _flags, peer)) => {
                    if version != VERSION {
                        return (
                            Responder::Failed(format!(
                                "node {peer} speaks distribution version {version}, \
                                 we require {VERSION}"
                            )),
                            Vec::new(),
                        );
                    }
                    let replies = vec![
                        encode_status_ok(),
                        encode_challenge(ctx.challenge, &ctx.local_node),
                    ];
                    (
                        Responder::AwaitReply {
                            peer,
                            expected: challenge_digest(&ctx.cookie, ctx.challenge),
                        },
                        replies,
                    )
                }
                Err(e) => (Responder::Failed(e.to_string()), Vec::new()),
            },
            Responder::AwaitReply { peer, expected } => match parse_challenge_reply(frame) {
                Ok((peer_challenge, digest)) if digest == expected => {
                    let ack =
                        encode_challenge_ack(&challenge_digest(&ctx.cookie, peer_challenge));
                    (Responder::Connected { peer }, vec![ack])
                }
                Ok(_) => (
                    Responder::Failed("peer sent a wrong digest; check the cookies".into()),
                    Vec::new(),
                ),
                Err(e) => (Responder::Failed(e.to_string()), Vec::new()),
            },
            done @ (Responder::Connected { .. } | Responder::Failed(_)) => (done, Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------
// Async drivers
// ---------------------------------------------------------------------

async fn write_frame<S>(stream: &mut S, body: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_u16(body.len() as u16).await?;
    stream.write_all(body).await?;
    Ok(())
}

async fn read_frame<S>(stream: &mut S, framer: &mut Framer) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = framer.next_frame() {
            return Ok(frame.to_vec());
        }
        let mut chunk = [0u8; 512];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::HandshakeFailure(
                "peer closed the connection mid-handshake".into(),
            ));
        }
        framer.feed(&chunk[..n]);
    }
}

/// Runs the connecting side of the handshake to completion.
///
/// On return the stream is authenticated; switch the framer to
/// [`Prefix::Connected`] before reading further.
pub(crate) async fn initiate<S>(
    stream: &mut S,
    framer: &mut Framer,
    ctx: &HandshakeContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut state, name) = Initiator::start(ctx);
    write_frame(stream, &name).await?;

    loop {
        let frame = read_frame(stream, framer).await?;
        let (next, replies) = state.next(&frame, ctx);
        for reply in &replies {
            write_frame(stream, reply).await?;
        }
        state = next;
        match state {
            Initiator::Connected => return Ok(()),
            Initiator::Failed(reason) => return Err(Error::HandshakeFailure(reason)),
            _ => {}
        }
    }
}

/// Runs the accepting side of the handshake to completion, returning the
/// peer's node name.
pub(crate) async fn accept<S>(
    stream: &mut S,
    framer: &mut Framer,
    ctx: &HandshakeContext,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = Responder::start();

    loop {
        let frame = read_frame(stream, framer).await?;
        let (next, replies) = state.next(&frame, ctx);
        for reply in &replies {
            write_frame(stream, reply).await?;
        }
        state = next;
        match state {
            Responder::Connected { peer } => return Ok(peer),
            Responder::Failed(reason) => return Err(Error::HandshakeFailure(reason)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(node: &str, cookie: &str, challenge: u32) -> HandshakeContext {
        HandshakeContext {
            local_node: node.to_string(),
            cookie: cookie.to_string(),
            challenge,
        }
    }

    #[test]
    fn test_digest_of_cookie_and_decimal_challenge() {
        // MD5("abcdef" ++ "42"), computed independently.
        let expected: HandshakeDigest = [
            0xb5, 0xea, 0xb9, 0x21, 0x3f, 0x20, 0x4e, 0x79, 0x81, 0x66, 0x81, 0xd6, 0xa8, 0xde,
            0x40, 0xba,
        ];
        assert_eq!(challenge_digest("abcdef", 42), expected);
    }

    #[test]
    fn test_challenge_stays_in_24_bits() {
        for _ in 0..64 {
            assert!(generate_challenge() <= 0xFF_FFFF);
        }
    }

    #[test]
    fn test_name_roundtrip() {
        let frame = encode_name("a@host");
        let (version, flags, name) = parse_name(&frame).unwrap();
        assert_eq!(version, VERSION);
        assert_eq!(flags, CAPABILITIES);
        assert_eq!(name, "a@host");
    }

    #[test]
    fn test_challenge_roundtrip() {
        let frame = encode_challenge(0xAB_CDEF, "b@host");
        let (challenge, name) = parse_challenge(&frame).unwrap();
        assert_eq!(challenge, 0xAB_CDEF);
        assert_eq!(name, "b@host");
    }

    /// Pipes the two machines against each other in memory.
    fn run_machines(
        a_ctx: &HandshakeContext,
        b_ctx: &HandshakeContext,
    ) -> (Initiator, Responder) {
        let (mut a, opening) = Initiator::start(a_ctx);
        let mut b = Responder::start();

        let mut to_b = vec![opening];
        let mut to_a: Vec<Vec<u8>> = Vec::new();

        for _ in 0..8 {
            for frame in std::mem::take(&mut to_b) {
                let (next, replies) = b.next(&frame, b_ctx);
                b = next;
                to_a.extend(replies);
            }
            for frame in std::mem::take(&mut to_a) {
                let (next, replies) = a.next(&frame, a_ctx);
                a = next;
                to_b.extend(replies);
            }
            if to_a.is_empty() && to_b.is_empty() {
                break;
            }
        }
        (a, b)
    }

    #[test]
    fn test_handshake_completes_with_shared_cookie() {
        let a_ctx = ctx("a@host", "secret", 1111);
        let b_ctx = ctx("b@host", "secret", 2222);
        let (a, b) = run_machines(&a_ctx, &b_ctx);

        assert!(matches!(a, Initiator::Connected), "initiator: {a:?}");
        match b {
            Responder::Connected { peer } => assert_eq!(peer, "a@host"),
            other => panic!("responder: {other:?}"),
        }
    }

    #[test]
    fn test_cookie_mismatch_fails_both_sides() {
        let a_ctx = ctx("a@host", "secret", 1111);
        let b_ctx = ctx("b@host", "wrong", 2222);
        let (a, b) = run_machines(&a_ctx, &b_ctx);

        // B detects the bad reply digest; A never gets a valid ack.
        assert!(!matches!(a, Initiator::Connected));
        assert!(matches!(b, Responder::Failed(_)));
    }

    #[test]
    fn test_refused_status_fails_initiator() {
        let a_ctx = ctx("a@host", "secret", 1);
        let (state, _) = Initiator::start(&a_ctx);
        let mut frame = vec![b's'];
        frame.extend_from_slice(b"nok");
        let (state, replies) = state.next(&frame, &a_ctx);
        assert!(matches!(state, Initiator::Failed(_)));
        assert!(replies.is_empty());
    }

    #[test]
    fn test_version_mismatch_fails_responder() {
        let b_ctx = ctx("b@host", "secret", 2);
        let mut frame = vec![b'n'];
        frame.extend_from_slice(&4u16.to_be_bytes());
        frame.extend_from_slice(&CAPABILITIES.to_be_bytes());
        frame.extend_from_slice(b"old@host");

        let (state, replies) = Responder::start().next(&frame, &b_ctx);
        assert!(matches!(state, Responder::Failed(_)));
        assert!(replies.is_empty());
    }

    #[test]
    fn test_out_of_order_frame_fails() {
        let a_ctx = ctx("a@host", "secret", 1);
        let (state, _) = Initiator::start(&a_ctx);
        // An ack before the status is a protocol violation.
        let frame = encode_challenge_ack(&[0u8; DIGEST_LEN]);
        let (state, _) = state.next(&frame, &a_ctx);
        assert!(matches!(state, Initiator::Failed(_)));
    }

    #[tokio::test]
    async fn test_async_drivers_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let a_ctx = ctx("a@host", "monster", generate_challenge());
        let b_ctx = ctx("b@host", "monster", generate_challenge());

        let server_task = tokio::spawn(async move {
            let mut framer = Framer::new(Prefix::Handshake);
            accept(&mut server, &mut framer, &b_ctx).await
        });

        let mut framer = Framer::new(Prefix::Handshake);
        initiate(&mut client, &mut framer, &a_ctx).await.unwrap();

        let peer = server_task.await.unwrap().unwrap();
        assert_eq!(peer, "a@host");
    }

    #[tokio::test]
    async fn test_async_drivers_reject_bad_cookie() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let a_ctx = ctx("a@host", "left", generate_challenge());
        let b_ctx = ctx("b@host", "right", generate_challenge());

        let server_task = tokio::spawn(async move {
            let mut framer = Framer::new(Prefix::Handshake);
            accept(&mut server, &mut framer, &b_ctx).await
        });

        let mut framer = Framer::new(Prefix::Handshake);
        let client_result = initiate(&mut client, &mut framer, &a_ctx).await;

        assert!(server_task.await.unwrap().is_err());
        assert!(client_result.is_err());
    }
}

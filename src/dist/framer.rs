//! Length-prefixed message framing.
//!
//! TCP is a byte stream; the distribution protocol is a sequence of
//! length-prefixed messages. The framer owns a rolling buffer: arrivals are
//! appended with [`Framer::feed`] and complete messages are popped with
//! [`Framer::next_frame`], which strips the prefix. Short reads stay
//! buffered until the rest arrives.
//!
//! The handshake uses a 2-byte prefix and the connected phase a 4-byte one.
//! Switching with [`Framer::set_prefix`] keeps buffered bytes, because a
//! peer may pipeline its first connected-mode message right behind the
//! final handshake frame.

use bytes::{Buf, Bytes, BytesMut};

/// Width of the length field in front of each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    /// 2-byte lengths, used during the handshake.
    Handshake,
    /// 4-byte lengths, used once connected.
    Connected,
}

impl Prefix {
    fn width(self) -> usize {
        match self {
            Prefix::Handshake => 2,
            Prefix::Connected => 4,
        }
    }
}

/// Reassembles length-prefixed messages out of a byte stream.
#[derive(Debug)]
pub(crate) struct Framer {
    prefix: Prefix,
    buf: BytesMut,
}

impl Framer {
    pub(crate) fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            buf: BytesMut::new(),
        }
    }

    /// Appends newly arrived bytes.
    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Switches the prefix width, retaining any buffered bytes.
    pub(crate) fn set_prefix(&mut self, prefix: Prefix) {
        self.prefix = prefix;
    }

    /// Pops the next complete message, without its length prefix.
    ///
    /// The length field counts the bytes after itself, so a zero length
    /// yields an empty frame (a keep-alive tick).
    pub(crate) fn next_frame(&mut self) -> Option<Bytes> {
        let width = self.prefix.width();
        if self.buf.len() < width {
            return None;
        }
        let len = match self.prefix {
            Prefix::Handshake => u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize,
            Prefix::Connected => {
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize
            }
        };
        if self.buf.len() < width + len {
            return None;
        }
        self.buf.advance(width);
        Some(self.buf.split_to(len).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut Framer) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(f) = framer.next_frame() {
            frames.push(f.to_vec());
        }
        frames
    }

    #[test]
    fn test_short_read_then_completion() {
        let mut framer = Framer::new(Prefix::Connected);
        framer.feed(&[0x00, 0x00, 0x00, 0x02]);
        assert!(framer.next_frame().is_none());

        framer.feed(&[0x83, 0x61]);
        assert_eq!(drain(&mut framer), vec![vec![0x83, 0x61]]);
        assert!(framer.next_frame().is_none());
    }

    #[test]
    fn test_any_partitioning_yields_same_frames() {
        // Three messages, including an empty tick.
        let stream: Vec<u8> = [
            vec![0, 0, 0, 2, 0x83, 0x61],
            vec![0, 0, 0, 0],
            vec![0, 0, 0, 3, 1, 2, 3],
        ]
        .concat();

        let expected = {
            let mut framer = Framer::new(Prefix::Connected);
            framer.feed(&stream);
            drain(&mut framer)
        };
        assert_eq!(
            expected,
            vec![vec![0x83, 0x61], vec![], vec![1u8, 2, 3]]
        );

        // Byte-at-a-time.
        let mut framer = Framer::new(Prefix::Connected);
        let mut got = Vec::new();
        for byte in &stream {
            framer.feed(&[*byte]);
            got.extend(drain(&mut framer));
        }
        assert_eq!(got, expected);

        // Every split point of the stream into two arrivals.
        for cut in 0..=stream.len() {
            let mut framer = Framer::new(Prefix::Connected);
            let mut got = Vec::new();
            framer.feed(&stream[..cut]);
            got.extend(drain(&mut framer));
            framer.feed(&stream[cut..]);
            got.extend(drain(&mut framer));
            assert_eq!(got, expected, "partition at {cut} diverged");
        }
    }

    #[test]
    fn test_handshake_prefix_is_two_bytes() {
        let mut framer = Framer::new(Prefix::Handshake);
        framer.feed(&[0x00, 0x03, b'o', b'k', b'!']);
        assert_eq!(drain(&mut framer), vec![b"ok!".to_vec()]);
    }

    #[test]
    fn test_prefix_switch_keeps_buffered_bytes() {
        let mut framer = Framer::new(Prefix::Handshake);
        // One complete handshake frame, then a connected-mode frame that
        // arrived in the same read.
        framer.feed(&[0x00, 0x01, b'a', 0x00, 0x00, 0x00, 0x01, b'b']);
        assert_eq!(framer.next_frame().unwrap().as_ref(), b"a");

        framer.set_prefix(Prefix::Connected);
        assert_eq!(framer.next_frame().unwrap().as_ref(), b"b");
    }
}

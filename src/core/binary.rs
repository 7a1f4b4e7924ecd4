//! Binary and bit-string values.

use crate::error::{Error, Result};
use std::fmt;

/// A binary, optionally with a trailing partial byte.
///
/// Erlang allows bit-strings whose length is not a whole number of bytes.
/// `padding_bits` counts the unused low bits of the final byte; a plain
/// binary has zero padding. The unused bits are forced to zero on
/// construction so that equality stays structural.
///
/// # Examples
///
/// ```
/// use erlink::Binary;
///
/// let whole = Binary::new(vec![0xAB, 0xCD]);
/// assert_eq!(whole.padding_bits(), 0);
///
/// // A 13-bit string: the low 3 bits of the last byte are padding.
/// let bits = Binary::with_padding(vec![0xAB, 0xFF], 3).unwrap();
/// assert_eq!(bits.bytes(), &[0xAB, 0xF8]);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    bytes: Vec<u8>,
    padding_bits: u8,
}

impl Binary {
    /// Creates a whole-byte binary.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            padding_bits: 0,
        }
    }

    /// Creates a bit-string with the given number of unused low bits in the
    /// last byte.
    ///
    /// Fails if `padding_bits` exceeds 7, or if padding is requested for an
    /// empty byte sequence.
    pub fn with_padding(mut bytes: Vec<u8>, padding_bits: u8) -> Result<Self> {
        if padding_bits > 7 {
            return Err(Error::Encoding {
                term: "binary",
                detail: format!("padding of {padding_bits} bits exceeds a byte"),
            });
        }
        if padding_bits > 0 && bytes.is_empty() {
            return Err(Error::Encoding {
                term: "binary",
                detail: "padding bits on an empty binary".into(),
            });
        }
        if padding_bits > 0 {
            // Normalize: unused bits read as zero.
            let last = bytes.last_mut().expect("non-empty checked above");
            *last &= 0xffu8 << padding_bits;
        }
        Ok(Self {
            bytes,
            padding_bits,
        })
    }

    /// Returns the byte contents.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the number of unused low bits in the final byte.
    #[inline]
    pub const fn padding_bits(&self) -> u8 {
        self.padding_bits
    }

    /// Returns `true` if this is a plain whole-byte binary.
    #[inline]
    pub const fn is_whole_bytes(&self) -> bool {
        self.padding_bits == 0
    }
}

impl From<Vec<u8>> for Binary {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Binary {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.padding_bits == 0 {
            write!(f, "Binary({:02x?})", self.bytes)
        } else {
            write!(f, "Binary({:02x?}/{} pad)", self.bytes, self.padding_bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_normalized() {
        let b = Binary::with_padding(vec![0xFF], 3).unwrap();
        assert_eq!(b.bytes(), &[0xF8]);

        // Equal to an already-normalized value.
        let c = Binary::with_padding(vec![0xF8], 3).unwrap();
        assert_eq!(b, c);
    }

    #[test]
    fn test_empty_with_padding_is_rejected() {
        assert!(Binary::with_padding(vec![], 1).is_err());
        // Zero padding on empty is fine.
        assert!(Binary::with_padding(vec![], 0).is_ok());
    }

    #[test]
    fn test_padding_out_of_range() {
        assert!(Binary::with_padding(vec![1], 8).is_err());
    }
}

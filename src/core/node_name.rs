//! Node identifier parsing.
//!
//! Cluster nodes are addressed as `name@host`. Both halves must be
//! non-empty and restricted to word characters, dots and dashes.

use crate::error::{Error, Result};

/// A validated `name@host` node identifier, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeName {
    full: String,
    at: usize,
}

fn valid_part(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

impl NodeName {
    /// Parses and validates a node identifier.
    pub(crate) fn parse(full: &str) -> Result<Self> {
        let at = full
            .find('@')
            .ok_or_else(|| Error::InvalidNodeName(full.to_string()))?;
        let (name, host) = (&full[..at], &full[at + 1..]);
        if !valid_part(name) || !valid_part(host) {
            return Err(Error::InvalidNodeName(full.to_string()));
        }
        Ok(Self {
            full: full.to_string(),
            at,
        })
    }

    /// The full `name@host` identifier.
    pub(crate) fn full(&self) -> &str {
        &self.full
    }

    /// The part before the `@`; this is what EPMD knows the node as.
    pub(crate) fn name(&self) -> &str {
        &self.full[..self.at]
    }

    /// The part after the `@`.
    pub(crate) fn host(&self) -> &str {
        &self.full[self.at + 1..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_name_and_host() {
        let n = NodeName::parse("demo-1@127.0.0.1").unwrap();
        assert_eq!(n.name(), "demo-1");
        assert_eq!(n.host(), "127.0.0.1");
        assert_eq!(n.full(), "demo-1@127.0.0.1");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for bad in ["plain", "@host", "name@", "na me@host", "name@ho st", ""] {
            assert!(NodeName::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_parse_allows_word_chars() {
        assert!(NodeName::parse("a_b.c-d@my-host.local").is_ok());
    }
}

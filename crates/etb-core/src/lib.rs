//! etb-core - shared model and protocol for the evidential tool bus
//!
//! Everything both the daemon (etbd) and the shell (etbsh) need to agree on:
//! - the term model, substitutions and unification;
//! - the goal/rule parser and the canonical printed form;
//! - claims and derivation edges;
//! - wrapper predicate signatures;
//! - the wire protocol (requests, responses, tagged JSON term encoding);
//! - node configuration.

pub mod claims;
pub mod config;
pub mod error;
pub mod fileref;
pub mod parser;
pub mod rules;
pub mod signature;
pub mod subst;
pub mod term;
pub mod unify;
pub mod wire;

pub use claims::{Claim, Reason};
pub use error::EtbError;
pub use fileref::FileRef;
pub use rules::Rule;
pub use signature::{ArgKind, ArgMode, ArgSpec};
pub use subst::Subst;
pub use term::{Literal, Term};

/// Hex-encode a byte slice (lowercase).
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// SHA-1 digest of a byte slice as a lowercase hex string.
pub fn sha1_hex(bytes: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    to_hex(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex_known_vector() {
        // sha1("abc") is a published test vector
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_sha1_hex_empty() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}

//! Claims: ground literals with evidentiary derivations.
//!
//! Every claim records how it was obtained - from a base fact, a wrapper
//! invocation, a rule instance discharging its body through child claims,
//! or a remote peer. Claims travel on the wire as
//! `{"__Claim": literal, "__Reason": edge}`.

use crate::error::EtbError;
use crate::term::Literal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

/// The derivation edge attached to a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    /// Unified directly against a fact in the rule base.
    Fact { rule: String },
    /// Produced by a wrapper invocation. `digest` keys the invocation:
    /// the wrapper name plus the hash of its instantiated arguments.
    Wrapper { name: String, digest: String },
    /// A rule instance; `children` are the digests of the claims that
    /// discharged each body literal, in body order.
    RuleInstance { rule: String, children: Vec<String> },
    /// Delivered by a peer; `claim` is the digest of the claim in the
    /// peer's own table.
    Remote { peer: String, claim: String },
    /// An error observation attached to a failed goal.
    Error { messages: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Claim {
    pub literal: Literal,
    pub reason: Reason,
}

impl Claim {
    pub fn new(literal: Literal, reason: Reason) -> Self {
        Claim { literal, reason }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.reason, Reason::Error { .. })
    }

    /// Content digest of the (literal, edge) pair; the cross-node claim
    /// identity referenced by remote derivation edges.
    pub fn digest(&self) -> String {
        let reason_json =
            serde_json::to_string(&self.reason).unwrap_or_else(|_| String::from("?"));
        crate::sha1_hex(format!("{}|{}", self.literal, reason_json).as_bytes())
    }

    pub fn to_wire(&self) -> Value {
        json!({
            "__Claim": self.literal.to_wire(),
            "__Reason": serde_json::to_value(&self.reason).unwrap_or(Value::Null),
        })
    }

    pub fn from_wire(value: &Value) -> Result<Claim, EtbError> {
        let obj = value
            .as_object()
            .ok_or_else(|| EtbError::wire("claim must be an object"))?;
        let literal = obj
            .get("__Claim")
            .ok_or_else(|| EtbError::wire("missing __Claim tag"))
            .and_then(Literal::from_wire)?;
        let reason = obj
            .get("__Reason")
            .ok_or_else(|| EtbError::wire("missing __Reason tag"))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| EtbError::wire(format!("bad __Reason: {}", e)))
            })?;
        Ok(Claim { literal, reason })
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Reason::Fact { .. } => write!(f, "claim({}, fact)", self.literal),
            Reason::Wrapper { name, .. } => write!(f, "claim({}, wrapper {})", self.literal, name),
            Reason::RuleInstance { children, .. } => {
                write!(f, "claim({}, rule/{} children)", self.literal, children.len())
            }
            Reason::Remote { peer, .. } => write!(f, "claim({}, remote {})", self.literal, peer),
            Reason::Error { messages } => {
                write!(f, "claim({}, error: {})", self.literal, messages.join("; "))
            }
        }
    }
}

impl Serialize for Claim {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Claim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Claim, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Claim::from_wire(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_literal;

    #[test]
    fn test_wire_roundtrip() {
        let c = Claim::new(
            parse_literal("parent(bill, mary)").unwrap(),
            Reason::Fact {
                rule: "abc123".into(),
            },
        );
        let json = serde_json::to_string(&c).unwrap();
        let back: Claim = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_digest_distinguishes_edges() {
        let lit = parse_literal("p(a)").unwrap();
        let fact = Claim::new(lit.clone(), Reason::Fact { rule: "r1".into() });
        let wrapped = Claim::new(
            lit,
            Reason::Wrapper {
                name: "p".into(),
                digest: "d1".into(),
            },
        );
        assert_ne!(fact.digest(), wrapped.digest());
        // the same (literal, edge) pair always digests identically
        assert_eq!(fact.digest(), fact.clone().digest());
    }

    #[test]
    fn test_error_claims() {
        let c = Claim::new(
            parse_literal("error(\"unknown predicate\", foo(a))").unwrap(),
            Reason::Error {
                messages: vec!["unknown predicate foo/1".into()],
            },
        );
        assert!(c.is_error());
        let back: Claim = serde_json::from_str(&serde_json::to_string(&c).unwrap()).unwrap();
        assert!(back.is_error());
    }
}

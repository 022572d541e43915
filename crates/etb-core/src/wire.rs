//! Wire protocol between shells, daemons and peers.
//!
//! Framing is newline-delimited JSON over TCP: one `Request { id, method }`
//! per line in, one `Response { id, result }` per line out. Structured
//! payloads (terms, substitutions, claims) use the tagged JSON encoding
//! defined in `term`, `subst` and `claims`. File bodies are base64 strings.
//!
//! Peers use the same surface as clients plus the privileged peer-only
//! methods (`Offers`, `RemoteQuery`, `DeliverAnswer`, `Closed`,
//! `AdvertisePeers`, `Handshake`).

use crate::claims::Claim;
use crate::fileref::FileRef;
use crate::subst::Subst;
use crate::term::Literal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted request line, matching the teacher daemon's guard
/// against unbounded reads. File uploads dominate: 64 MiB of base64.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Response {
    pub fn ok(id: u64, data: ResponseData) -> Self {
        Response { id, result: Ok(data) }
    }

    pub fn fault(id: u64, message: impl Into<String>) -> Self {
        Response {
            id,
            result: Err(message.into()),
        }
    }
}

/// One known peer, as held in the peer table and gossiped on membership
/// change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub reachable_since: DateTime<Utc>,
    pub last_ping: Option<DateTime<Utc>>,
    /// Advertised `pred/arity` keys (rule heads and wrapper names).
    pub predicates: Vec<String>,
}

/// Working-tree classification returned by `ls`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LsListing {
    pub dirs: Vec<String>,
    pub in_sync: Vec<String>,
    pub outdated: Vec<String>,
    pub untracked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    /// Health check.
    Ping,

    /// Store a file body (base64) under a destination path; returns the
    /// content-addressed reference.
    PutFile { path: String, contents: String },

    /// Stream back the blob of a known reference (base64).
    GetFile { file: FileRef },

    /// Classify a directory against the file-store mirror.
    Ls { dir: String },

    /// Parse and admit a goal string; returns a query id.
    Query { goal: String },

    /// Block until the query completes.
    QueryWait { query: String },

    QueryDone { query: String },

    QueryAnswers { query: String },

    QueryClaims { query: String },

    /// Error-tagged claims for a query.
    QueryErrors { query: String },

    /// Close a query: its exclusive goal subtree is terminated and the
    /// ephemeral rules it introduced are retracted.
    QueryClose { query: String },

    GetAllClaims,

    ActiveQueries,

    DoneQueries,

    /// Join the fabric of the node listening at host:port.
    Connect { host: String, port: u16 },

    /// Install a tunnel indirection: dial fabric members via `local_port`,
    /// and have the remote side reach this node via `remote_port` of the
    /// relay.
    Tunnel { local_port: u16, remote_port: u16 },

    // ---- peer-only surface ----
    /// Does this node offer `pred/arity` (rule head or wrapper)?
    Offers { predicate: String },

    /// Blob sync between peers: like `GetFile` but strictly local, so two
    /// nodes can never bounce a missing blob back and forth.
    FetchBlob { file: FileRef },

    /// Admit a literal as a local root goal on behalf of a peer.
    /// Answers are pushed back to `requester` (a fabric member id).
    RemoteQuery {
        goal: Literal,
        correlation: String,
        requester: String,
    },

    /// Push one answer for an outstanding delegation.
    DeliverAnswer {
        correlation: String,
        answer: Subst,
        claim: String,
    },

    /// The delegated goal is quiescent; no more answers will arrive.
    Closed { correlation: String },

    /// Membership gossip.
    AdvertisePeers { peers: Vec<PeerInfo> },

    /// Two-way join: the caller introduces itself and everything it knows;
    /// the callee replies in kind. `reply_port` is set when the caller is
    /// reachable only through a tunnel relay on that port.
    Handshake {
        me: PeerInfo,
        known: Vec<PeerInfo>,
        reply_port: Option<u16>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResponseData {
    Ok,

    File(FileRef),

    FileContents { contents: String },

    Listing(LsListing),

    QueryId { query: String },

    Done { done: bool },

    Answers { answers: Vec<Subst> },

    Claims { claims: Vec<Claim> },

    Queries { queries: Vec<String> },

    Offers { offers: bool },

    Peers { peers: Vec<PeerInfo> },

    Handshake { me: PeerInfo, known: Vec<PeerInfo> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_literal;

    #[test]
    fn test_request_roundtrip() {
        let req = Request {
            id: 7,
            method: Method::Query {
                goal: "ancestor(bill, Y)".into(),
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert!(matches!(back.method, Method::Query { goal } if goal == "ancestor(bill, Y)"));
    }

    #[test]
    fn test_peer_method_roundtrip() {
        let req = Request {
            id: 1,
            method: Method::RemoteQuery {
                goal: parse_literal("asciidoc(\"\", {file: \"doc.adoc\", sha1: \"9af1\"}, Html)")
                    .unwrap(),
                correlation: "c-1".into(),
                requester: "node-b".into(),
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        match back.method {
            Method::RemoteQuery { goal, correlation, .. } => {
                assert_eq!(goal.pred, "asciidoc");
                assert_eq!(correlation, "c-1");
            }
            other => panic!("unexpected method {:?}", other),
        }
    }

    #[test]
    fn test_fault_response() {
        let resp = Response::fault(3, "parse error at offset 4: expected a term");
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert!(back.result.is_err());
    }
}

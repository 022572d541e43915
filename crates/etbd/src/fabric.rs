//! The network fabric: peer table, membership merging and tunnels.
//!
//! Every node keeps a table of known peers with their advertised predicates.
//! Handshakes merge peer tables transitively, yielding a fully connected
//! fabric. A tunnel installs a per-peer dial override consulted immediately
//! before every outbound call; inbound handshakes carrying a reply port
//! install the override on the receiving side.

use chrono::Utc;
use etb_core::wire::PeerInfo;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub info: PeerInfo,
    pub reachable: bool,
    /// Tunnel rewrite: dial this address instead of the advertised one.
    pub dial: Option<(String, u16)>,
}

#[derive(Debug)]
pub struct Fabric {
    me: PeerInfo,
    peers: Mutex<HashMap<String, PeerEntry>>,
}

impl Fabric {
    pub fn new(id: &str, host: &str, port: u16, predicates: Vec<String>) -> Self {
        Fabric {
            me: PeerInfo {
                id: id.to_owned(),
                host: host.to_owned(),
                port,
                reachable_since: Utc::now(),
                last_ping: None,
                predicates,
            },
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.me.id
    }

    pub fn me(&self) -> PeerInfo {
        self.me.clone()
    }

    /// Record (or refresh) a peer. A `dial` override survives refreshes
    /// that do not set one. Returns true when the peer was unknown.
    pub fn upsert(&self, info: PeerInfo, dial: Option<(String, u16)>) -> bool {
        if info.id == self.me.id {
            return false;
        }
        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(&info.id) {
            Some(entry) => {
                entry.info.predicates = info.predicates;
                entry.reachable = true;
                if dial.is_some() {
                    entry.dial = dial;
                }
                false
            }
            None => {
                info!("fabric: new peer {} at {}:{}", info.id, info.host, info.port);
                peers.insert(
                    info.id.clone(),
                    PeerEntry {
                        info,
                        reachable: true,
                        dial,
                    },
                );
                true
            }
        }
    }

    /// Merge a gossiped peer list; returns the peers that were new to us.
    pub fn merge(&self, incoming: Vec<PeerInfo>) -> Vec<PeerInfo> {
        incoming
            .into_iter()
            .filter(|p| self.upsert(p.clone(), None))
            .collect()
    }

    /// Everything we know, including ourselves; the gossip payload.
    pub fn snapshot_with_me(&self) -> Vec<PeerInfo> {
        let peers = self.peers.lock().unwrap();
        let mut out = vec![self.me.clone()];
        out.extend(peers.values().map(|e| e.info.clone()));
        out
    }

    pub fn reachable_peers(&self) -> Vec<PeerInfo> {
        let peers = self.peers.lock().unwrap();
        peers
            .values()
            .filter(|e| e.reachable)
            .map(|e| e.info.clone())
            .collect()
    }

    /// Address to dial for a peer, after tunnel rewriting.
    pub fn dial_addr(&self, id: &str) -> Option<(String, u16)> {
        let peers = self.peers.lock().unwrap();
        peers.get(id).map(|e| {
            e.dial
                .clone()
                .unwrap_or_else(|| (e.info.host.clone(), e.info.port))
        })
    }

    /// First reachable peer advertising `pred/arity`.
    pub fn find_provider(&self, functor: &str) -> Option<PeerInfo> {
        let peers = self.peers.lock().unwrap();
        peers
            .values()
            .filter(|e| e.reachable)
            .find(|e| e.info.predicates.iter().any(|p| p == functor))
            .map(|e| e.info.clone())
    }

    pub fn touch_ping(&self, id: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(entry) = peers.get_mut(id) {
            entry.info.last_ping = Some(Utc::now());
            entry.reachable = true;
        }
    }

    pub fn mark_unreachable(&self, id: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(entry) = peers.get_mut(id) {
            if entry.reachable {
                debug!("fabric: peer {} marked unreachable", id);
            }
            entry.reachable = false;
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, port: u16, preds: &[&str]) -> PeerInfo {
        PeerInfo {
            id: id.into(),
            host: "127.0.0.1".into(),
            port,
            reachable_since: Utc::now(),
            last_ping: None,
            predicates: preds.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_merge_is_transitive_closure_step() {
        let fabric = Fabric::new("a", "127.0.0.1", 9000, vec![]);
        let new = fabric.merge(vec![peer("b", 9001, &[]), peer("c", 9002, &[])]);
        assert_eq!(new.len(), 2);
        // re-merging yields nothing new; self is never added
        let again = fabric.merge(vec![peer("b", 9001, &[]), fabric.me()]);
        assert!(again.is_empty());
        assert_eq!(fabric.len(), 2);
    }

    #[test]
    fn test_find_provider_by_advertisement() {
        let fabric = Fabric::new("a", "127.0.0.1", 9000, vec![]);
        fabric.upsert(peer("b", 9001, &["asciidoc/3"]), None);
        assert!(fabric.find_provider("asciidoc/3").is_some());
        assert!(fabric.find_provider("asciidoc/2").is_none());
        fabric.mark_unreachable("b");
        assert!(fabric.find_provider("asciidoc/3").is_none());
    }

    #[test]
    fn test_tunnel_dial_override() {
        let fabric = Fabric::new("a", "127.0.0.1", 9000, vec![]);
        fabric.upsert(peer("b", 9001, &[]), Some(("127.0.0.1".into(), 7501)));
        assert_eq!(fabric.dial_addr("b"), Some(("127.0.0.1".into(), 7501)));
        // a later gossip refresh does not clobber the override
        fabric.upsert(peer("b", 9001, &[]), None);
        assert_eq!(fabric.dial_addr("b"), Some(("127.0.0.1".into(), 7501)));
    }
}

//! Node assembly and lifecycle.
//!
//! A node is one process-wide instance with an explicit start and shutdown:
//! rule files and wrapper manifests are loaded, the engine actor is
//! spawned, and the fabric begins with an empty peer table. Everything the
//! RPC surface needs goes through this type, so integration tests can
//! drive a node in-process without a socket.

use crate::claims_table::ClaimsTable;
use crate::engine::{Engine, EngineDeps, EngineMsg};
use crate::fabric::Fabric;
use crate::filestore::FileStore;
use crate::peer_client;
use crate::queries::{QueryRegistry, RemoteConsumer};
use crate::rulebase::RuleBase;
use crate::wrappers::{subprocess::SubprocessWrapper, WrapperRegistry};
use anyhow::{Context, Result};
use etb_core::config::EtbConfig;
use etb_core::wire::{Method, PeerInfo, ResponseData};
use etb_core::{parser, Claim, EtbError, Literal, Subst};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Interval between peer health pings.
const PING_INTERVAL_SECS: u64 = 30;

pub struct Node {
    pub id: String,
    pub config: EtbConfig,
    pub claims: Arc<ClaimsTable>,
    pub queries: Arc<QueryRegistry>,
    pub fabric: Arc<Fabric>,
    pub wrappers: Arc<WrapperRegistry>,
    pub store: Arc<FileStore>,
    /// `pred/arity` keys this node offers: permanent rule heads plus
    /// wrapper names.
    pub advertised: BTreeSet<String>,
    engine_tx: mpsc::UnboundedSender<EngineMsg>,
}

impl Node {
    /// Build a node and spawn its engine. Must run inside a tokio runtime.
    pub fn start(config: EtbConfig) -> Result<Arc<Node>> {
        let id = format!("etb-{}", Uuid::new_v4());
        let store = Arc::new(
            FileStore::open(config.workdir()).context("cannot open node working directory")?,
        );

        let mut rules = RuleBase::new();
        for file in &config.etb.rule_files {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("cannot read rule file {}", file))?;
            let parsed = parser::parse_rules(&text)
                .with_context(|| format!("cannot parse rule file {}", file))?;
            info!("loaded {} rules from {}", parsed.len(), file);
            for rule in parsed {
                rules.add_permanent(rule);
            }
        }

        let mut registry = WrapperRegistry::with_builtins();
        if let Some(dir) = &config.etb.wrappers_dir {
            for wrapper in SubprocessWrapper::load_dir(Path::new(dir)) {
                registry.register(wrapper);
            }
        }
        let wrappers = Arc::new(registry);

        let mut advertised = rules.advertised_functors();
        advertised.extend(wrappers.functors());

        let fabric = Arc::new(Fabric::new(
            &id,
            &config.etb.host,
            config.etb.port,
            advertised.iter().cloned().collect(),
        ));
        let claims = Arc::new(ClaimsTable::new());
        let queries = Arc::new(QueryRegistry::new());

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let deps = EngineDeps {
            node_id: id.clone(),
            claims: claims.clone(),
            queries: queries.clone(),
            fabric: fabric.clone(),
            wrappers: wrappers.clone(),
            store: store.clone(),
            remote_timeout: Duration::from_secs(config.etb.remote_timeout_secs),
            remote_retries: config.etb.remote_retries,
            wrapper_timeout: Duration::from_secs(config.etb.wrapper_timeout_secs),
            tx: engine_tx.clone(),
        };
        tokio::spawn(Engine::new(deps, rules).run(engine_rx));

        info!(
            "node {} up: {} advertised predicates, workdir {}",
            id,
            advertised.len(),
            config.etb.workdir
        );
        Ok(Arc::new(Node {
            id,
            config,
            claims,
            queries,
            fabric,
            wrappers,
            store,
            advertised,
            engine_tx,
        }))
    }

    fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.config.etb.remote_timeout_secs)
    }

    // ---- query surface ----

    /// Parse and admit a goal string. Parse errors are synchronous; nothing
    /// is admitted.
    pub fn query(&self, goal: &str) -> Result<String, EtbError> {
        let literal = parser::parse_literal(goal)?;
        Ok(self.admit(literal, None))
    }

    /// Admit a literal on behalf of a peer; answers are pushed back.
    pub fn admit_remote(&self, literal: Literal, correlation: String, requester: String) -> String {
        self.admit(
            literal,
            Some(RemoteConsumer {
                peer: requester,
                correlation,
            }),
        )
    }

    fn admit(&self, literal: Literal, remote: Option<RemoteConsumer>) -> String {
        let query = Uuid::new_v4().to_string();
        self.queries
            .create(&query, literal.clone(), &self.id, 0, remote.clone());
        let _ = self.engine_tx.send(EngineMsg::Admit {
            query: query.clone(),
            literal,
            remote,
        });
        query
    }

    pub fn query_done(&self, query: &str) -> Option<bool> {
        self.queries.done(query)
    }

    /// Block until the query completes. False when the query is unknown.
    pub async fn query_wait(&self, query: &str) -> bool {
        let Some(mut rx) = self.queries.subscribe(query) else {
            return false;
        };
        loop {
            if *rx.borrow() {
                return true;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    pub fn query_answers(&self, query: &str) -> Option<Vec<Subst>> {
        self.queries.answers(query)
    }

    pub fn query_claims(&self, query: &str) -> Option<Vec<Claim>> {
        self.queries
            .goals(query)
            .map(|goals| self.claims.for_goals(&goals))
    }

    pub fn query_errors(&self, query: &str) -> Option<Vec<Claim>> {
        self.queries
            .goals(query)
            .map(|goals| self.claims.errors_for_goals(&goals))
    }

    pub fn close_query(&self, query: &str) {
        let _ = self.engine_tx.send(EngineMsg::Close {
            query: query.to_owned(),
        });
    }

    pub fn all_claims(&self) -> Vec<Claim> {
        self.claims.all()
    }

    pub fn active_queries(&self) -> Vec<String> {
        self.queries.active()
    }

    pub fn done_queries(&self) -> Vec<String> {
        self.queries.completed()
    }

    /// Does this node offer `pred/arity`?
    pub fn offers(&self, functor: &str) -> bool {
        self.advertised.contains(functor)
    }

    // ---- peer surface plumbing ----

    pub fn deliver_answer(&self, correlation: String, answer: Subst, claim: String) {
        let _ = self.engine_tx.send(EngineMsg::RemoteAnswer {
            correlation,
            answer,
            claim,
        });
    }

    pub fn remote_closed(&self, correlation: String) {
        let _ = self.engine_tx.send(EngineMsg::RemoteClosed { correlation });
    }

    // ---- fabric operations ----

    /// Join the fabric of the node at host:port. With `tunnel`, dial the
    /// relay's local port instead and advertise the remote port back.
    pub async fn connect(&self, host: &str, port: u16, tunnel: Option<(u16, u16)>) -> Result<()> {
        let (dial_host, dial_port) = match tunnel {
            Some((local, _)) => ("127.0.0.1".to_string(), local),
            None => (host.to_string(), port),
        };
        let reply = peer_client::call(
            &dial_host,
            dial_port,
            Method::Handshake {
                me: self.fabric.me(),
                known: self.fabric.snapshot_with_me(),
                reply_port: tunnel.map(|(_, remote)| remote),
            },
            self.remote_timeout(),
        )
        .await?;
        let ResponseData::Handshake { me, known } = reply else {
            anyhow::bail!("unexpected handshake reply");
        };
        let dial_override = tunnel.map(|(local, _)| ("127.0.0.1".to_string(), local));
        self.fabric.upsert(me, dial_override);
        let newly = self.fabric.merge(known);
        for peer in newly {
            contact(self.fabric.clone(), self.remote_timeout(), peer);
        }
        gossip(self.fabric.clone(), self.remote_timeout());
        Ok(())
    }

    /// Inbound handshake: record the caller (rewritten through the tunnel
    /// relay when a reply port is given), merge its peer table, contact
    /// anyone new, and gossip the change.
    pub fn handle_handshake(
        &self,
        caller: PeerInfo,
        known: Vec<PeerInfo>,
        reply_port: Option<u16>,
    ) -> (PeerInfo, Vec<PeerInfo>) {
        let dial_override = reply_port.map(|p| ("127.0.0.1".to_string(), p));
        self.fabric.upsert(caller, dial_override);
        let newly = self.fabric.merge(known);
        let reply = (self.fabric.me(), self.fabric.snapshot_with_me());
        for peer in newly {
            contact(self.fabric.clone(), self.remote_timeout(), peer);
        }
        gossip(self.fabric.clone(), self.remote_timeout());
        reply
    }

    /// Membership gossip arrived; returns our current table as the reply.
    pub fn handle_advertise(&self, peers: Vec<PeerInfo>) -> Vec<PeerInfo> {
        let newly = self.fabric.merge(peers);
        if !newly.is_empty() {
            for peer in newly {
                contact(self.fabric.clone(), self.remote_timeout(), peer);
            }
            gossip(self.fabric.clone(), self.remote_timeout());
        }
        self.fabric.snapshot_with_me()
    }

    /// Periodic peer health loop; runs until the runtime shuts down.
    pub fn spawn_ping_loop(&self) {
        let fabric = self.fabric.clone();
        let timeout = self.remote_timeout();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
            loop {
                interval.tick().await;
                for peer in fabric.reachable_peers() {
                    let Some((host, port)) = fabric.dial_addr(&peer.id) else {
                        continue;
                    };
                    match peer_client::call(&host, port, Method::Ping, timeout).await {
                        Ok(_) => fabric.touch_ping(&peer.id),
                        Err(_) => fabric.mark_unreachable(&peer.id),
                    }
                }
            }
        });
    }
}

/// Symmetric handshake with a newly learned peer; anyone it knows that we
/// do not gets contacted in turn, closing the fabric transitively.
fn contact(fabric: Arc<Fabric>, timeout: Duration, peer: PeerInfo) {
    tokio::spawn(async move {
        let Some((host, port)) = fabric.dial_addr(&peer.id) else {
            return;
        };
        let reply = peer_client::call(
            &host,
            port,
            Method::Handshake {
                me: fabric.me(),
                known: fabric.snapshot_with_me(),
                reply_port: None,
            },
            timeout,
        )
        .await;
        match reply {
            Ok(ResponseData::Handshake { me, known }) => {
                fabric.upsert(me, None);
                let newly = fabric.merge(known);
                for next in newly {
                    contact(fabric.clone(), timeout, next);
                }
            }
            Ok(_) => warn!("peer {} sent an unexpected handshake reply", peer.id),
            Err(e) => {
                warn!("cannot contact peer {}: {}", peer.id, e);
                fabric.mark_unreachable(&peer.id);
            }
        }
    });
}

/// Push the membership snapshot to every reachable peer.
fn gossip(fabric: Arc<Fabric>, timeout: Duration) {
    tokio::spawn(async move {
        let snapshot = fabric.snapshot_with_me();
        for peer in fabric.reachable_peers() {
            let Some((host, port)) = fabric.dial_addr(&peer.id) else {
                continue;
            };
            let result = peer_client::call(
                &host,
                port,
                Method::AdvertisePeers {
                    peers: snapshot.clone(),
                },
                timeout,
            )
            .await;
            if let Err(e) = result {
                warn!("gossip to {} failed: {}", peer.id, e);
            }
        }
    });
}

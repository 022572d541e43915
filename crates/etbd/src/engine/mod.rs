//! The goal engine.
//!
//! Goal-directed SLD resolution with tabling, driven as a single-owner
//! actor: one task owns the goal table and rule base and processes
//! `EngineMsg`s from a channel, so operations on any one goal are trivially
//! serialised. Wrapper invocations and remote delegations are the
//! suspension points - they run as spawned tasks that report back over the
//! same channel, keeping long tool runs outside the engine.
//!
//! After every message the internal worklist is drained to a fixpoint and a
//! completion sweep tests quiescence: a query completes when its root goal
//! and every goal reachable through the spawned-subgoal edges has no
//! outstanding dispatched action.

pub mod goals;

use crate::claims_table::ClaimsTable;
use crate::fabric::Fabric;
use crate::filestore::{self, FileStore};
use crate::peer_client;
use crate::queries::{QueryRegistry, RemoteConsumer};
use crate::rulebase::RuleBase;
use crate::wrappers::{
    check_modes, input_filerefs, invocation_digest, output_vars, Outcome, WrapperContext,
    WrapperRegistry,
};
use etb_core::claims::{Claim, Reason};
use etb_core::unify::unify_literals;
use etb_core::wire::{Method, PeerInfo, ResponseData};
use etb_core::{Literal, Rule, Subst, Term};
use goals::{Activation, GoalId, GoalState, GoalTable};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub enum EngineMsg {
    /// Admit a parsed goal under an already-registered query id.
    Admit {
        query: String,
        literal: Literal,
        remote: Option<RemoteConsumer>,
    },
    /// Client-initiated query close.
    Close { query: String },
    /// A wrapper invocation finished.
    WrapperOutcome {
        goal: GoalId,
        name: String,
        outcome: Outcome,
    },
    /// A peer pushed an answer for an outstanding delegation.
    RemoteAnswer {
        correlation: String,
        answer: Subst,
        claim: String,
    },
    /// A peer reported its delegated goal quiescent.
    RemoteClosed { correlation: String },
    /// A delegation attempt failed in transport or was refused.
    RemoteFailed { correlation: String, message: String },
    /// The per-attempt deadline expired without `RemoteClosed`.
    RemoteDeadline { correlation: String },
}

/// Shared services the engine and its spawned tasks need.
#[derive(Clone)]
pub struct EngineDeps {
    pub node_id: String,
    pub claims: Arc<ClaimsTable>,
    pub queries: Arc<QueryRegistry>,
    pub fabric: Arc<Fabric>,
    pub wrappers: Arc<WrapperRegistry>,
    pub store: Arc<FileStore>,
    pub remote_timeout: Duration,
    pub remote_retries: u32,
    pub wrapper_timeout: Duration,
    pub tx: mpsc::UnboundedSender<EngineMsg>,
}

#[derive(Debug)]
struct RemoteTask {
    goal: GoalId,
    peer: String,
    attempt: u32,
}

/// Ordered outbound stream to one remote consumer. Deliveries for a
/// delegation go through a single worker so `closed` can never overtake an
/// answer on the wire.
#[derive(Debug)]
enum Delivery {
    Answer(Subst, String),
    Closed,
}

enum Work {
    Eval(GoalId),
    Feed(goals::ActId),
}

pub struct Engine {
    deps: EngineDeps,
    rules: RuleBase,
    table: GoalTable,
    remote_out: HashMap<String, RemoteTask>,
    /// Delivery workers keyed by query id, for queries with a remote
    /// consumer.
    deliveries: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    work: VecDeque<Work>,
    rename_counter: u64,
}

impl Engine {
    pub fn new(deps: EngineDeps, rules: RuleBase) -> Self {
        Engine {
            deps,
            rules,
            table: GoalTable::new(),
            remote_out: HashMap::new(),
            deliveries: HashMap::new(),
            work: VecDeque::new(),
            rename_counter: 0,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMsg>) {
        info!("engine started on node {}", self.deps.node_id);
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
        info!("engine stopped");
    }

    /// Process one message, drain the worklist, sweep for completion.
    pub fn handle(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Admit {
                query,
                literal,
                remote,
            } => self.admit(query, literal, remote),
            EngineMsg::Close { query } => self.close(&query),
            EngineMsg::WrapperOutcome { goal, name, outcome } => {
                self.wrapper_outcome(goal, name, outcome)
            }
            EngineMsg::RemoteAnswer {
                correlation,
                answer,
                claim,
            } => self.remote_answer(&correlation, answer, claim),
            EngineMsg::RemoteClosed { correlation } => self.remote_closed(&correlation),
            EngineMsg::RemoteFailed { correlation, message } => {
                self.remote_failed(&correlation, &message)
            }
            EngineMsg::RemoteDeadline { correlation } => {
                self.remote_failed(&correlation, "remote deadline expired")
            }
        }
        self.drain();
        self.sweep_completion();
    }

    // ---- admission and closure ----

    fn admit(&mut self, query: String, literal: Literal, remote: Option<RemoteConsumer>) {
        let (root, created) = self.table.intern(&literal);
        self.deps.queries.set_root(&query, root);
        debug!("query {} admitted: {} (goal {})", query, literal, root);
        if created {
            self.work.push_back(Work::Eval(root));
        } else {
            // aliased onto an existing goal: backfill tabled answers,
            // translated into this query's own variable frame
            let entries = self
                .table
                .get(root)
                .map(|g| g.answers.clone())
                .unwrap_or_default();
            let table_literal = self.table.get(root).map(|g| g.literal.clone());
            for entry in entries {
                let Some(table_literal) = table_literal.as_ref() else {
                    break;
                };
                let Some(translated) =
                    self.answer_for_query(&query, table_literal, &entry.subst)
                else {
                    continue;
                };
                self.deps.queries.push_answer(&query, translated.clone());
                if let Some(rc) = &remote {
                    let rc = rc.clone();
                    self.deliver(
                        &query,
                        &rc,
                        Delivery::Answer(translated, entry.claim.unwrap_or_default()),
                    );
                }
            }
        }
    }

    /// Translate an answer tabled against a goal's own literal into the
    /// variable frame of a query literal aliased onto that goal.
    fn answer_for_query(
        &mut self,
        query: &str,
        table_literal: &Literal,
        subst: &Subst,
    ) -> Option<Subst> {
        let query_literal = self.deps.queries.literal(query)?;
        let instance = self.fresh_rename(&subst.apply_literal(table_literal));
        unify_literals(&query_literal, &instance).map(|delta| delta.restrict(&query_literal.vars()))
    }

    fn close(&mut self, query: &str) {
        let Some(root) = self.deps.queries.close(query) else {
            return;
        };
        let mine = self.table.reachable(root);
        let mut others: BTreeSet<GoalId> = BTreeSet::new();
        for other_root in self.deps.queries.live_roots_except(query) {
            others.extend(self.table.reachable(other_root));
        }
        let exclusive: BTreeSet<GoalId> = mine.difference(&others).copied().collect();
        let retracted = self.rules.retract_by_origin(&exclusive);
        self.remote_out.retain(|_, task| !exclusive.contains(&task.goal));
        for id in &exclusive {
            if let Some(goal) = self.table.get_mut(*id) {
                goal.state = GoalState::Closed;
                goal.pending = 0;
            }
        }
        info!(
            "query {} closed: {} goals terminated, {} ephemeral rules retracted",
            query,
            exclusive.len(),
            retracted
        );
    }

    // ---- the resolution worklist ----

    fn drain(&mut self) {
        while let Some(work) = self.work.pop_front() {
            match work {
                Work::Eval(goal) => self.eval(goal),
                Work::Feed(act) => self.feed(act),
            }
        }
    }

    /// First expansion of a fresh goal: facts and rules, then the wrapper,
    /// then remote delegation or an unknown-predicate error.
    fn eval(&mut self, goal_id: GoalId) {
        let literal = match self.table.get(goal_id) {
            Some(goal) if goal.state != GoalState::Closed => goal.literal.clone(),
            _ => return,
        };
        let functor = literal.functor();
        let candidates = self.rules.candidates(&functor);
        let have_rules = !candidates.is_empty();
        for stored in candidates {
            self.try_rule(goal_id, &stored.rule, &stored.hash);
        }
        if self.deps.wrappers.contains(&functor) {
            self.dispatch_wrapper(goal_id, &literal);
        } else if !have_rules {
            match self.deps.fabric.find_provider(&functor) {
                Some(peer) => self.dispatch_remote(goal_id, &literal, peer, 1),
                None => {
                    self.emit_error(goal_id, vec![format!("unknown predicate {}", functor)]);
                }
            }
        }
    }

    fn try_rule(&mut self, goal_id: GoalId, rule: &Rule, hash: &str) {
        let Some(goal_literal) = self.table.get(goal_id).map(|g| g.literal.clone()) else {
            return;
        };
        let renamed = rule.rename_apart(&mut self.rename_counter);
        let Some(theta) = unify_literals(&goal_literal, &renamed.head) else {
            return;
        };
        if renamed.body.is_empty() {
            self.record_answer(goal_id, theta, Reason::Fact { rule: hash.to_owned() });
        } else {
            self.step_activation(Activation {
                id: 0,
                parent: goal_id,
                rule_hash: hash.to_owned(),
                remaining: renamed.body,
                subst: theta,
                children: Vec::new(),
                waiting_literal: None,
                waiting_on: None,
                cursor: 0,
            });
        }
    }

    /// Advance an activation: either finish (producing an answer for its
    /// parent) or register it on the subgoal for its next body literal.
    fn step_activation(&mut self, mut act: Activation) {
        if act.remaining.is_empty() {
            let reason = Reason::RuleInstance {
                rule: act.rule_hash.clone(),
                children: act.children.clone(),
            };
            self.record_answer(act.parent, act.subst.clone(), reason);
            return;
        }
        let next = act.subst.apply_literal(&act.remaining[0]);
        let (sub, created) = self.table.intern(&next);
        if let Some(parent) = self.table.get_mut(act.parent) {
            parent.children.insert(sub);
        }
        act.waiting_literal = Some(next);
        act.waiting_on = Some(sub);
        act.cursor = 0;
        let act_id = self.table.add_activation(act);
        if let Some(goal) = self.table.get_mut(sub) {
            goal.consumers.push(act_id);
        }
        if created {
            self.work.push_back(Work::Eval(sub));
        }
        self.work.push_back(Work::Feed(act_id));
    }

    /// Deliver unconsumed answers of the waited-on goal to an activation,
    /// in insertion order, each exactly once.
    fn feed(&mut self, act_id: goals::ActId) {
        loop {
            let (sub_id, cursor, requested, base) = match self.table.act(act_id) {
                Some(act) => match (act.waiting_on, &act.waiting_literal) {
                    (Some(sub), Some(lit)) => (sub, act.cursor, lit.clone(), act.clone()),
                    _ => return,
                },
                None => return,
            };
            let entry = match self
                .table
                .get(sub_id)
                .and_then(|g| g.answers.get(cursor))
                .cloned()
            {
                Some(entry) => entry,
                None => return,
            };
            if let Some(act) = self.table.act_mut(act_id) {
                act.cursor += 1;
            }
            let Some(sub_literal) = self.table.get(sub_id).map(|g| g.literal.clone()) else {
                return;
            };
            // The answer is tabled against the subgoal's own literal, which
            // may differ from the requested one by renaming (aliasing).
            // Unifying the requested literal against a freshened answer
            // instance translates the bindings into the consumer's frame.
            let instance = self.fresh_rename(&entry.subst.apply_literal(&sub_literal));
            let Some(delta) = unify_literals(&requested, &instance) else {
                continue;
            };
            let mut children = base.children.clone();
            if let Some(digest) = entry.claim {
                children.push(digest);
            }
            self.step_activation(Activation {
                id: 0,
                parent: base.parent,
                rule_hash: base.rule_hash.clone(),
                remaining: base.remaining[1..].to_vec(),
                subst: base.subst.compose(&delta),
                children,
                waiting_literal: None,
                waiting_on: None,
                cursor: 0,
            });
        }
    }

    /// Rename the variables of a literal fresh, so table-side variable
    /// names can never capture consumer-side ones.
    fn fresh_rename(&mut self, literal: &Literal) -> Literal {
        let mut assigned: BTreeMap<String, String> = BTreeMap::new();
        let counter = &mut self.rename_counter;
        literal.rename_vars(&mut |v| {
            assigned
                .entry(v.to_owned())
                .or_insert_with(|| {
                    *counter += 1;
                    format!("_i{}", counter)
                })
                .clone()
        })
    }

    /// Record an answer for a goal: claim first (deduplicated by the
    /// table), then the answer itself, then consumer and query wakeups.
    fn record_answer(&mut self, goal_id: GoalId, sigma: Subst, reason: Reason) {
        let Some(goal_literal) = self.table.get(goal_id).map(|g| g.literal.clone()) else {
            return;
        };
        let restricted = sigma.restrict(&goal_literal.vars());
        let instance = restricted.apply_literal(&goal_literal);
        let claim_digest = if instance.is_ground() {
            Some(self.deps.claims.insert(Claim::new(instance, reason), goal_id))
        } else {
            None
        };
        let added = match self.table.get_mut(goal_id) {
            Some(goal) => goal.push_answer(restricted.clone(), claim_digest.clone()),
            None => false,
        };
        if !added {
            return;
        }
        let consumers = self
            .table
            .get(goal_id)
            .map(|g| g.consumers.clone())
            .unwrap_or_default();
        for act in consumers {
            self.work.push_back(Work::Feed(act));
        }
        for query in self.deps.queries.rooted_at(goal_id) {
            let Some(translated) = self.answer_for_query(&query, &goal_literal, &restricted)
            else {
                continue;
            };
            self.deps.queries.push_answer(&query, translated.clone());
            if let Some(rc) = self.deps.queries.remote_consumer(&query) {
                self.deliver(
                    &query,
                    &rc,
                    Delivery::Answer(translated, claim_digest.clone().unwrap_or_default()),
                );
            }
        }
    }

    /// Attach an error observation to a goal. The offending goal is
    /// rendered as a string so the claim stays ground.
    fn emit_error(&mut self, goal_id: GoalId, messages: Vec<String>) {
        let Some(goal_literal) = self.table.get(goal_id).map(|g| g.literal.clone()) else {
            return;
        };
        warn!("goal {}: {}", goal_literal, messages.join("; "));
        let literal = Literal::new(
            "error",
            vec![
                Term::Str(messages.first().cloned().unwrap_or_default()),
                Term::Str(goal_literal.to_string()),
            ],
        );
        self.deps
            .claims
            .insert(Claim::new(literal, Reason::Error { messages }), goal_id);
    }

    // ---- wrappers ----

    fn dispatch_wrapper(&mut self, goal_id: GoalId, literal: &Literal) {
        let already = self
            .table
            .get(goal_id)
            .map(|g| g.wrapper_dispatched)
            .unwrap_or(true);
        if already {
            return;
        }
        let functor = literal.functor();
        let Some(wrapper) = self.deps.wrappers.get(&functor) else {
            return;
        };
        if let Err(problems) = check_modes(wrapper.signature(), literal) {
            if let Some(goal) = self.table.get_mut(goal_id) {
                goal.wrapper_dispatched = true;
            }
            self.emit_error(goal_id, problems);
            return;
        }
        let needed = input_filerefs(wrapper.signature(), literal);
        if let Some(goal) = self.table.get_mut(goal_id) {
            goal.wrapper_dispatched = true;
            goal.pending += 1;
            goal.state = GoalState::Pending;
        }
        let deps = self.deps.clone();
        let literal = literal.clone();
        let name = wrapper.name().to_owned();
        tokio::spawn(async move {
            for fileref in &needed {
                if let Err(message) =
                    filestore::ensure_local(&deps.store, &deps.fabric, fileref, deps.remote_timeout)
                        .await
                {
                    let _ = deps.tx.send(EngineMsg::WrapperOutcome {
                        goal: goal_id,
                        name: name.clone(),
                        outcome: Outcome::Errors(vec![message]),
                    });
                    return;
                }
            }
            let workspace = match deps.store.workspace(&format!("goal-{}", goal_id)) {
                Ok(dir) => dir,
                Err(e) => {
                    let _ = deps.tx.send(EngineMsg::WrapperOutcome {
                        goal: goal_id,
                        name: name.clone(),
                        outcome: Outcome::Errors(vec![format!("cannot create workspace: {}", e)]),
                    });
                    return;
                }
            };
            let ctx = WrapperContext {
                store: deps.store.clone(),
                workspace,
                timeout: deps.wrapper_timeout,
            };
            let outcome = wrapper.resolve(&ctx, &literal).await;
            let _ = deps.tx.send(EngineMsg::WrapperOutcome {
                goal: goal_id,
                name,
                outcome,
            });
        });
    }

    fn wrapper_outcome(&mut self, goal_id: GoalId, name: String, outcome: Outcome) {
        {
            let Some(goal) = self.table.get_mut(goal_id) else {
                return;
            };
            if goal.state == GoalState::Closed {
                return;
            }
            goal.pending = goal.pending.saturating_sub(1);
            if goal.pending == 0 && goal.state == GoalState::Pending {
                goal.state = GoalState::Open;
            }
        }
        let Some(literal) = self.table.get(goal_id).map(|g| g.literal.clone()) else {
            return;
        };
        match outcome {
            Outcome::Success => {
                let digest = invocation_digest(&name, &literal, &Subst::new());
                self.record_answer(goal_id, Subst::new(), Reason::Wrapper { name, digest });
            }
            Outcome::Failure => {}
            Outcome::Substitutions(substs) => {
                let allowed = self
                    .deps
                    .wrappers
                    .get(&literal.functor())
                    .map(|w| output_vars(w.signature(), &literal))
                    .unwrap_or_default();
                for subst in substs {
                    if subst.domain().any(|v| !allowed.contains(v)) {
                        self.emit_error(
                            goal_id,
                            vec![format!("wrapper {} bound a non-output variable", name)],
                        );
                        continue;
                    }
                    let digest = invocation_digest(&name, &literal, &subst);
                    self.record_answer(
                        goal_id,
                        subst,
                        Reason::Wrapper {
                            name: name.clone(),
                            digest,
                        },
                    );
                }
            }
            Outcome::Queries(substs, queries) => {
                for subst in &substs {
                    for query in &queries {
                        let rule = Rule::new(
                            subst.apply_literal(&literal),
                            vec![subst.apply_literal(query)],
                        );
                        self.add_dynamic_rule(goal_id, rule);
                    }
                }
            }
            Outcome::Lemmata(pairs) => {
                for (subst, body) in pairs {
                    let rule = Rule::new(
                        subst.apply_literal(&literal),
                        body.iter().map(|b| subst.apply_literal(b)).collect(),
                    );
                    self.add_dynamic_rule(goal_id, rule);
                }
            }
            Outcome::Errors(messages) => self.emit_error(goal_id, messages),
        }
    }

    /// Insert an ephemeral rule and restart rule matching for its origin
    /// goal with the augmented set. The table is additive: previously
    /// computed answers are untouched.
    fn add_dynamic_rule(&mut self, goal_id: GoalId, rule: Rule) {
        let hash = rule.hash();
        if self.rules.add_ephemeral(rule.clone(), goal_id) {
            debug!("goal {}: dynamic rule {}", goal_id, rule);
            self.try_rule(goal_id, &rule, &hash);
        }
    }

    // ---- remote delegation ----

    fn dispatch_remote(&mut self, goal_id: GoalId, literal: &Literal, peer: PeerInfo, attempt: u32) {
        let correlation = Uuid::new_v4().to_string();
        if let Some(goal) = self.table.get_mut(goal_id) {
            goal.pending += 1;
            goal.state = GoalState::Pending;
        }
        self.remote_out.insert(
            correlation.clone(),
            RemoteTask {
                goal: goal_id,
                peer: peer.id.clone(),
                attempt,
            },
        );
        debug!(
            "goal {}: delegating {} to peer {} (attempt {})",
            goal_id, literal, peer.id, attempt
        );
        let deps = self.deps.clone();
        let literal = literal.clone();
        tokio::spawn(async move {
            let (host, port) = deps
                .fabric
                .dial_addr(&peer.id)
                .unwrap_or((peer.host.clone(), peer.port));
            let functor = literal.functor();
            let fail = |message: String| EngineMsg::RemoteFailed {
                correlation: correlation.clone(),
                message,
            };
            match peer_client::call(
                &host,
                port,
                Method::Offers {
                    predicate: functor.clone(),
                },
                deps.remote_timeout,
            )
            .await
            {
                Ok(ResponseData::Offers { offers: true }) => {}
                Ok(_) => {
                    let _ = deps
                        .tx
                        .send(fail(format!("peer {} does not offer {}", peer.id, functor)));
                    return;
                }
                Err(e) => {
                    let _ = deps.tx.send(fail(e.to_string()));
                    return;
                }
            }
            match peer_client::call(
                &host,
                port,
                Method::RemoteQuery {
                    goal: literal,
                    correlation: correlation.clone(),
                    requester: deps.node_id.clone(),
                },
                deps.remote_timeout,
            )
            .await
            {
                Ok(_) => {
                    tokio::time::sleep(deps.remote_timeout).await;
                    let _ = deps.tx.send(EngineMsg::RemoteDeadline {
                        correlation: correlation.clone(),
                    });
                }
                Err(e) => {
                    let _ = deps.tx.send(fail(e.to_string()));
                }
            }
        });
    }

    fn remote_answer(&mut self, correlation: &str, answer: Subst, claim: String) {
        let Some(task) = self.remote_out.get(correlation) else {
            return;
        };
        let goal = task.goal;
        let peer = task.peer.clone();
        self.record_answer(goal, answer, Reason::Remote { peer, claim });
    }

    fn remote_closed(&mut self, correlation: &str) {
        let Some(task) = self.remote_out.remove(correlation) else {
            return;
        };
        if let Some(goal) = self.table.get_mut(task.goal) {
            goal.pending = goal.pending.saturating_sub(1);
            if goal.pending == 0 && goal.state == GoalState::Pending {
                goal.state = GoalState::Open;
            }
        }
        debug!("delegation {} closed by peer {}", correlation, task.peer);
    }

    fn remote_failed(&mut self, correlation: &str, message: &str) {
        let Some(task) = self.remote_out.remove(correlation) else {
            return; // already closed, or cancelled by a query close
        };
        let Some(goal) = self.table.get_mut(task.goal) else {
            return;
        };
        goal.pending = goal.pending.saturating_sub(1);
        let literal = goal.literal.clone();
        if task.attempt < self.deps.remote_retries {
            warn!(
                "delegation of {} to {} failed ({}), retrying",
                literal, task.peer, message
            );
            match self.deps.fabric.find_provider(&literal.functor()) {
                Some(peer) => {
                    self.dispatch_remote(task.goal, &literal, peer, task.attempt + 1);
                }
                None => self.emit_error(
                    task.goal,
                    vec![format!("no reachable provider for {}", literal.functor())],
                ),
            }
        } else {
            self.deps.fabric.mark_unreachable(&task.peer);
            self.emit_error(
                task.goal,
                vec![format!(
                    "remote evaluation of {} via {} failed after {} attempts: {}",
                    literal, task.peer, task.attempt, message
                )],
            );
        }
    }

    /// Queue a delivery to a remote consumer; the per-query worker sends
    /// them one at a time, in order.
    fn deliver(&mut self, query: &str, consumer: &RemoteConsumer, delivery: Delivery) {
        let sender = self.deliveries.entry(query.to_owned()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
            let deps = self.deps.clone();
            let peer = consumer.peer.clone();
            let correlation = consumer.correlation.clone();
            tokio::spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    let Some((host, port)) = deps.fabric.dial_addr(&peer) else {
                        warn!("cannot deliver to unknown peer {}", peer);
                        continue;
                    };
                    let (method, last) = match delivery {
                        Delivery::Answer(answer, claim) => (
                            Method::DeliverAnswer {
                                correlation: correlation.clone(),
                                answer,
                                claim,
                            },
                            false,
                        ),
                        Delivery::Closed => (
                            Method::Closed {
                                correlation: correlation.clone(),
                            },
                            true,
                        ),
                    };
                    if let Err(e) =
                        peer_client::call(&host, port, method, deps.remote_timeout).await
                    {
                        warn!("delivery to peer {} failed: {}", peer, e);
                    }
                    if last {
                        break;
                    }
                }
            });
            tx
        });
        let _ = sender.send(delivery);
    }

    // ---- quiescence ----

    /// A root query is completed when every goal transitively reachable
    /// from its root is quiescent (the worklist is already empty here).
    fn sweep_completion(&mut self) {
        for (query, root) in self.deps.queries.active_roots() {
            if root == 0 {
                continue; // admission message still in flight
            }
            let reachable = self.table.reachable(root);
            self.deps.queries.set_goals(&query, reachable.clone());
            let quiescent = reachable
                .iter()
                .all(|g| self.table.get(*g).map(|g| g.is_quiescent()).unwrap_or(true));
            if !quiescent {
                continue;
            }
            for id in &reachable {
                if let Some(goal) = self.table.get_mut(*id) {
                    if goal.state != GoalState::Closed {
                        goal.state = GoalState::Resolved;
                    }
                }
            }
            self.deps.queries.complete(&query);
            if let Some(rc) = self.deps.queries.remote_consumer(&query) {
                self.deliver(&query, &rc, Delivery::Closed);
                self.deliveries.remove(&query);
            }
            info!("query {} completed", query);
        }
    }

    // ---- introspection (tests and diagnostics) ----

    pub fn goal_count(&self) -> usize {
        self.table.goal_count()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.table.fingerprint_count()
    }

    pub fn live_rule_count(&self) -> usize {
        self.rules.len()
    }
}

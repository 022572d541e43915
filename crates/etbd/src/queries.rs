//! Query registry.
//!
//! A query is the client-visible identity of a root goal, with lifecycle
//! `active -> completed` (or `closed` on explicit cancellation). Waiters
//! subscribe to a watch channel flipped exactly once at completion.

use crate::engine::goals::GoalId;
use chrono::{DateTime, Utc};
use etb_core::{Literal, Subst};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Active,
    Completed,
    Closed,
}

/// A peer awaiting pushed answers for a delegated goal.
#[derive(Debug, Clone)]
pub struct RemoteConsumer {
    pub peer: String,
    pub correlation: String,
}

#[derive(Debug)]
pub struct QueryRecord {
    pub id: String,
    pub literal: Literal,
    pub created: DateTime<Utc>,
    pub origin: String,
    pub root: GoalId,
    pub state: QueryState,
    pub answers: Vec<Subst>,
    answer_keys: HashSet<String>,
    /// Goals reachable from the root; refreshed by the engine.
    pub goals: BTreeSet<GoalId>,
    pub remote: Option<RemoteConsumer>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
pub struct QueryRegistry {
    inner: Mutex<HashMap<String, QueryRecord>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        QueryRegistry::default()
    }

    pub fn create(
        &self,
        id: &str,
        literal: Literal,
        origin: &str,
        root: GoalId,
        remote: Option<RemoteConsumer>,
    ) {
        let (done_tx, done_rx) = watch::channel(false);
        let mut goals = BTreeSet::new();
        goals.insert(root);
        let record = QueryRecord {
            id: id.to_owned(),
            literal,
            created: Utc::now(),
            origin: origin.to_owned(),
            root,
            state: QueryState::Active,
            answers: Vec::new(),
            answer_keys: HashSet::new(),
            goals,
            remote,
            done_tx,
            done_rx,
        };
        self.inner.lock().unwrap().insert(id.to_owned(), record);
    }

    /// Bind the root goal once the engine has interned the literal.
    /// Records are created with root 0 (unset) by the RPC layer.
    pub fn set_root(&self, id: &str, root: GoalId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.get_mut(id) {
            record.root = root;
            record.goals.clear();
            record.goals.insert(root);
        }
    }

    /// Record an answer; duplicates (by canonical key) are dropped.
    pub fn push_answer(&self, id: &str, answer: Subst) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.get_mut(id) {
            if record.answer_keys.insert(answer.canonical_key()) {
                record.answers.push(answer);
            }
        }
    }

    pub fn set_goals(&self, id: &str, goals: BTreeSet<GoalId>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.get_mut(id) {
            record.goals = goals;
        }
    }

    pub fn complete(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.get_mut(id) {
            if record.state == QueryState::Active {
                record.state = QueryState::Completed;
                let _ = record.done_tx.send(true);
            }
        }
    }

    pub fn close(&self, id: &str) -> Option<GoalId> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_mut(id).map(|record| {
            record.state = QueryState::Closed;
            let _ = record.done_tx.send(true);
            record.root
        })
    }

    pub fn state(&self, id: &str) -> Option<QueryState> {
        self.inner.lock().unwrap().get(id).map(|r| r.state)
    }

    pub fn done(&self, id: &str) -> Option<bool> {
        self.state(id).map(|s| s != QueryState::Active)
    }

    pub fn root(&self, id: &str) -> Option<GoalId> {
        self.inner.lock().unwrap().get(id).map(|r| r.root)
    }

    pub fn literal(&self, id: &str) -> Option<Literal> {
        self.inner.lock().unwrap().get(id).map(|r| r.literal.clone())
    }

    pub fn answers(&self, id: &str) -> Option<Vec<Subst>> {
        self.inner.lock().unwrap().get(id).map(|r| r.answers.clone())
    }

    pub fn goals(&self, id: &str) -> Option<BTreeSet<GoalId>> {
        self.inner.lock().unwrap().get(id).map(|r| r.goals.clone())
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<bool>> {
        self.inner.lock().unwrap().get(id).map(|r| r.done_rx.clone())
    }

    pub fn active(&self) -> Vec<String> {
        self.list(QueryState::Active)
    }

    pub fn completed(&self) -> Vec<String> {
        self.list(QueryState::Completed)
    }

    fn list(&self, state: QueryState) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<(DateTime<Utc>, String)> = inner
            .values()
            .filter(|r| r.state == state)
            .map(|r| (r.created, r.id.clone()))
            .collect();
        out.sort();
        out.into_iter().map(|(_, id)| id).collect()
    }

    /// Ids of queries (any state) whose root is the given goal.
    pub fn rooted_at(&self, goal: GoalId) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .values()
            .filter(|r| r.root == goal)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Active queries with their roots, for the engine's completion sweep.
    pub fn active_roots(&self) -> Vec<(String, GoalId)> {
        let inner = self.inner.lock().unwrap();
        inner
            .values()
            .filter(|r| r.state == QueryState::Active)
            .map(|r| (r.id.clone(), r.root))
            .collect()
    }

    /// Roots of every query that is not closed, excluding `except`.
    pub fn live_roots_except(&self, except: &str) -> Vec<GoalId> {
        let inner = self.inner.lock().unwrap();
        inner
            .values()
            .filter(|r| r.id != except && r.state != QueryState::Closed)
            .map(|r| r.root)
            .collect()
    }

    pub fn remote_consumer(&self, id: &str) -> Option<RemoteConsumer> {
        self.inner.lock().unwrap().get(id).and_then(|r| r.remote.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etb_core::parser::parse_literal;

    fn registry_with(id: &str) -> QueryRegistry {
        let registry = QueryRegistry::new();
        registry.create(id, parse_literal("p(X)").unwrap(), "n1", 1, None);
        registry
    }

    #[test]
    fn test_lifecycle() {
        let registry = registry_with("q1");
        assert_eq!(registry.done("q1"), Some(false));
        assert_eq!(registry.active(), vec!["q1".to_string()]);
        registry.complete("q1");
        assert_eq!(registry.done("q1"), Some(true));
        assert_eq!(registry.completed(), vec!["q1".to_string()]);
        assert!(registry.active().is_empty());
    }

    #[test]
    fn test_answers_dedup() {
        let registry = registry_with("q1");
        let mut s = Subst::new();
        s.bind("X", etb_core::Term::Id("a".into()));
        registry.push_answer("q1", s.clone());
        registry.push_answer("q1", s);
        assert_eq!(registry.answers("q1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_fires_on_complete() {
        let registry = registry_with("q1");
        let mut rx = registry.subscribe("q1").unwrap();
        assert!(!*rx.borrow());
        registry.complete("q1");
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}

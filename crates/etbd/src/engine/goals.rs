//! Goal table: tabled goal records and rule activations.
//!
//! A goal is the evaluation record for a literal, keyed by fingerprint so
//! that alpha-equivalent subgoals alias to one record - at most one
//! evaluation per fingerprint per node. Activations are partially applied
//! rule instances waiting on a subgoal's answer stream; the consumer graph
//! is held as id-indexed adjacency, never as owning pointers, so cycles
//! among mutually recursive goals are harmless.

use etb_core::{Literal, Subst};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

pub type GoalId = u64;
pub type ActId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalState {
    Open,
    /// Awaiting a wrapper invocation or a remote delegation.
    Pending,
    /// Quiescent under a completed query.
    Resolved,
    /// Explicitly terminated by a query close.
    Closed,
}

#[derive(Debug, Clone)]
pub struct AnswerEntry {
    pub subst: Subst,
    /// Digest of the claim witnessing this answer; absent when the answer
    /// instance is not ground.
    pub claim: Option<String>,
}

#[derive(Debug)]
pub struct GoalRecord {
    pub id: GoalId,
    pub literal: Literal,
    pub fingerprint: String,
    pub state: GoalState,
    pub answers: Vec<AnswerEntry>,
    seen: HashSet<String>,
    /// Activations consuming this goal's answer stream.
    pub consumers: Vec<ActId>,
    /// Subgoals spawned beneath this goal; the quiescence edges.
    pub children: BTreeSet<GoalId>,
    /// Outstanding dispatched actions (wrapper or remote).
    pub pending: usize,
    /// Wrapper invoked at most once per goal record: answers are
    /// snapshotted at admission.
    pub wrapper_dispatched: bool,
}

impl GoalRecord {
    /// Record an answer; false when the substitution was already known
    /// (the table's duplicate suppression).
    pub fn push_answer(&mut self, subst: Subst, claim: Option<String>) -> bool {
        if self.seen.insert(subst.canonical_key()) {
            self.answers.push(AnswerEntry { subst, claim });
            true
        } else {
            false
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.pending == 0
    }
}

/// A rule instance part-way through discharging its body.
#[derive(Debug, Clone)]
pub struct Activation {
    pub id: ActId,
    /// The goal whose answer this rule instance would produce.
    pub parent: GoalId,
    pub rule_hash: String,
    /// Body literals not yet discharged; the first is the one being
    /// waited on once the activation is registered.
    pub remaining: Vec<Literal>,
    pub subst: Subst,
    /// Claim digests that discharged earlier body literals, in order.
    pub children: Vec<String>,
    /// The instantiated literal this activation is waiting on.
    pub waiting_literal: Option<Literal>,
    pub waiting_on: Option<GoalId>,
    /// Answers of the waited-on goal consumed so far.
    pub cursor: usize,
}

#[derive(Debug, Default)]
pub struct GoalTable {
    goals: HashMap<GoalId, GoalRecord>,
    by_fingerprint: HashMap<String, GoalId>,
    acts: HashMap<ActId, Activation>,
    next_goal: GoalId,
    next_act: ActId,
}

impl GoalTable {
    pub fn new() -> Self {
        GoalTable::default()
    }

    /// Get or create the goal for a literal. Returns (id, created).
    pub fn intern(&mut self, literal: &Literal) -> (GoalId, bool) {
        let fingerprint = literal.fingerprint();
        if let Some(&id) = self.by_fingerprint.get(&fingerprint) {
            return (id, false);
        }
        self.next_goal += 1;
        let id = self.next_goal;
        self.by_fingerprint.insert(fingerprint.clone(), id);
        self.goals.insert(
            id,
            GoalRecord {
                id,
                literal: literal.clone(),
                fingerprint,
                state: GoalState::Open,
                answers: Vec::new(),
                seen: HashSet::new(),
                consumers: Vec::new(),
                children: BTreeSet::new(),
                pending: 0,
                wrapper_dispatched: false,
            },
        );
        (id, true)
    }

    pub fn get(&self, id: GoalId) -> Option<&GoalRecord> {
        self.goals.get(&id)
    }

    pub fn get_mut(&mut self, id: GoalId) -> Option<&mut GoalRecord> {
        self.goals.get_mut(&id)
    }

    pub fn act(&self, id: ActId) -> Option<&Activation> {
        self.acts.get(&id)
    }

    pub fn act_mut(&mut self, id: ActId) -> Option<&mut Activation> {
        self.acts.get_mut(&id)
    }

    pub fn add_activation(&mut self, mut act: Activation) -> ActId {
        self.next_act += 1;
        act.id = self.next_act;
        let id = act.id;
        self.acts.insert(id, act);
        id
    }

    /// Goals reachable from `root` through spawned-subgoal edges,
    /// including the root itself.
    pub fn reachable(&self, root: GoalId) -> BTreeSet<GoalId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(goal) = self.goals.get(&id) {
                queue.extend(goal.children.iter().copied());
            }
        }
        seen
    }

    pub fn goal_count(&self) -> usize {
        self.goals.len()
    }

    /// Distinct fingerprints; equals `goal_count` by construction.
    pub fn fingerprint_count(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn goal_ids(&self) -> Vec<GoalId> {
        self.goals.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etb_core::parser::parse_literal;

    fn lit(s: &str) -> Literal {
        parse_literal(s).unwrap()
    }

    #[test]
    fn test_intern_aliases_equivalent_literals() {
        let mut table = GoalTable::new();
        let (a, created_a) = table.intern(&lit("parent(bill, Y)"));
        let (b, created_b) = table.intern(&lit("parent(bill, _r5)"));
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a, b);
        assert_eq!(table.fingerprint_count(), table.goal_count());
    }

    #[test]
    fn test_intern_distinguishes_structure() {
        let mut table = GoalTable::new();
        let (a, _) = table.intern(&lit("parent(bill, Y)"));
        let (b, _) = table.intern(&lit("parent(mary, Y)"));
        let (c, _) = table.intern(&lit("parent(X, Y)"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_answer_dedup() {
        let mut table = GoalTable::new();
        let (id, _) = table.intern(&lit("p(X)"));
        let goal = table.get_mut(id).unwrap();
        let mut s = Subst::new();
        s.bind("X", etb_core::Term::Id("a".into()));
        assert!(goal.push_answer(s.clone(), None));
        assert!(!goal.push_answer(s, None));
        assert_eq!(goal.answers.len(), 1);
    }

    #[test]
    fn test_reachable_follows_children() {
        let mut table = GoalTable::new();
        let (a, _) = table.intern(&lit("a(X)"));
        let (b, _) = table.intern(&lit("b(X)"));
        let (c, _) = table.intern(&lit("c(X)"));
        let (d, _) = table.intern(&lit("d(X)"));
        table.get_mut(a).unwrap().children.insert(b);
        table.get_mut(b).unwrap().children.insert(c);
        // a cycle must not hang the sweep
        table.get_mut(c).unwrap().children.insert(a);
        let reach = table.reachable(a);
        assert!(reach.contains(&a) && reach.contains(&b) && reach.contains(&c));
        assert!(!reach.contains(&d));
    }
}

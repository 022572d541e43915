//! The claims table.
//!
//! Append-only. Indexed by ground literal; every (literal, derivation edge)
//! pair is stored at most once, but the same literal may carry edges from
//! several derivation paths - any one is a valid witness. Each row remembers
//! the goal that produced it so per-query views can be answered.

use crate::engine::goals::GoalId;
use etb_core::{Claim, Literal};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ClaimRow {
    pub claim: Claim,
    pub digest: String,
    pub goal: GoalId,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<ClaimRow>,
    digests: HashSet<String>,
    by_literal: HashMap<String, Vec<usize>>,
    by_goal: HashMap<GoalId, Vec<usize>>,
}

#[derive(Debug, Default)]
pub struct ClaimsTable {
    inner: Mutex<Inner>,
}

impl ClaimsTable {
    pub fn new() -> Self {
        ClaimsTable::default()
    }

    /// Append a claim unless this exact (literal, edge) pair is already
    /// present. Returns the claim digest either way.
    pub fn insert(&self, claim: Claim, goal: GoalId) -> String {
        let digest = claim.digest();
        let mut inner = self.inner.lock().unwrap();
        if inner.digests.insert(digest.clone()) {
            let index = inner.rows.len();
            let literal_key = claim.literal.key();
            inner.rows.push(ClaimRow {
                claim,
                digest: digest.clone(),
                goal,
            });
            inner.by_literal.entry(literal_key).or_default().push(index);
            inner.by_goal.entry(goal).or_default().push(index);
        }
        digest
    }

    pub fn all(&self) -> Vec<Claim> {
        let inner = self.inner.lock().unwrap();
        inner.rows.iter().map(|r| r.claim.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All claims produced while evaluating any of the given goals.
    pub fn for_goals(&self, goals: &BTreeSet<GoalId>) -> Vec<Claim> {
        let inner = self.inner.lock().unwrap();
        let mut indices: Vec<usize> = goals
            .iter()
            .flat_map(|g| inner.by_goal.get(g).cloned().unwrap_or_default())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| inner.rows[i].claim.clone()).collect()
    }

    /// Error-tagged claims among the given goals.
    pub fn errors_for_goals(&self, goals: &BTreeSet<GoalId>) -> Vec<Claim> {
        self.for_goals(goals)
            .into_iter()
            .filter(Claim::is_error)
            .collect()
    }

    /// Claims whose literal matches the given ground literal.
    pub fn for_literal(&self, literal: &Literal) -> Vec<Claim> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_literal
            .get(&literal.key())
            .map(|indices| indices.iter().map(|&i| inner.rows[i].claim.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains_digest(&self, digest: &str) -> bool {
        self.inner.lock().unwrap().digests.contains(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etb_core::claims::Reason;
    use etb_core::parser::parse_literal;

    fn claim(lit: &str, rule: &str) -> Claim {
        Claim::new(
            parse_literal(lit).unwrap(),
            Reason::Fact { rule: rule.into() },
        )
    }

    #[test]
    fn test_duplicate_edges_suppressed() {
        let table = ClaimsTable::new();
        table.insert(claim("p(a)", "r1"), 1);
        table.insert(claim("p(a)", "r1"), 1);
        assert_eq!(table.len(), 1);
        // same literal, different edge: both retained
        table.insert(claim("p(a)", "r2"), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.for_literal(&parse_literal("p(a)").unwrap()).len(), 2);
    }

    #[test]
    fn test_per_goal_views() {
        let table = ClaimsTable::new();
        table.insert(claim("p(a)", "r1"), 1);
        table.insert(claim("q(b)", "r2"), 2);
        table.insert(
            Claim::new(
                parse_literal("error(\"boom\", q(c))").unwrap(),
                Reason::Error {
                    messages: vec!["boom".into()],
                },
            ),
            2,
        );
        let goals: BTreeSet<GoalId> = [2].into_iter().collect();
        assert_eq!(table.for_goals(&goals).len(), 2);
        assert_eq!(table.errors_for_goals(&goals).len(), 1);
        let both: BTreeSet<GoalId> = [1, 2].into_iter().collect();
        assert_eq!(table.for_goals(&both).len(), 3);
    }
}

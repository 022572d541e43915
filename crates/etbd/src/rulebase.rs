//! The rule base.
//!
//! Rules are indexed by head functor (`pred/arity`). Each rule carries an
//! epoch and, for ephemeral rules emitted by wrappers, the goal that
//! produced it - closing that goal retracts the rules in one single-writer
//! operation. Enumeration filters by epoch visibility so a resolution step
//! sees either all of a retracted set or none of it.

use crate::engine::goals::GoalId;
use etb_core::Rule;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct StoredRule {
    pub rule: Rule,
    pub hash: String,
    pub epoch: u64,
    /// `None` for permanent rules (rule files, startup facts).
    pub origin: Option<GoalId>,
    retracted: bool,
}

#[derive(Debug, Default)]
pub struct RuleBase {
    by_functor: HashMap<String, Vec<usize>>,
    rules: Vec<StoredRule>,
    hashes: HashSet<String>,
    epoch: u64,
}

impl RuleBase {
    pub fn new() -> Self {
        RuleBase::default()
    }

    /// Insert a permanent rule. Duplicate content is ignored.
    pub fn add_permanent(&mut self, rule: Rule) -> bool {
        self.insert(rule, None)
    }

    /// Insert an ephemeral rule produced while evaluating `origin`.
    pub fn add_ephemeral(&mut self, rule: Rule, origin: GoalId) -> bool {
        self.insert(rule, Some(origin))
    }

    fn insert(&mut self, rule: Rule, origin: Option<GoalId>) -> bool {
        let hash = rule.hash();
        if !self.hashes.insert(hash.clone()) {
            return false;
        }
        self.epoch += 1;
        let functor = rule.head.functor();
        let index = self.rules.len();
        self.rules.push(StoredRule {
            rule,
            hash,
            epoch: self.epoch,
            origin,
            retracted: false,
        });
        self.by_functor.entry(functor).or_default().push(index);
        true
    }

    /// Live candidate rules for a literal, in insertion order.
    pub fn candidates(&self, functor: &str) -> Vec<StoredRule> {
        self.by_functor
            .get(functor)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &self.rules[i])
                    .filter(|r| !r.retracted)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Are there any live rules with this head functor?
    pub fn has_functor(&self, functor: &str) -> bool {
        self.by_functor
            .get(functor)
            .map(|indices| indices.iter().any(|&i| !self.rules[i].retracted))
            .unwrap_or(false)
    }

    /// Functors of all live permanent rules, for predicate advertisement.
    pub fn advertised_functors(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .filter(|r| !r.retracted && r.origin.is_none())
            .map(|r| r.rule.head.functor())
            .collect()
    }

    /// Retract every ephemeral rule whose origin goal is in `origins`.
    /// Returns the number of rules retracted.
    pub fn retract_by_origin(&mut self, origins: &BTreeSet<GoalId>) -> usize {
        let mut count = 0;
        for stored in &mut self.rules {
            if stored.retracted {
                continue;
            }
            if let Some(origin) = stored.origin {
                if origins.contains(&origin) {
                    stored.retracted = true;
                    self.hashes.remove(&stored.hash);
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.epoch += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.rules.iter().filter(|r| !r.retracted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etb_core::parser::parse_rule;

    fn rule(s: &str) -> Rule {
        parse_rule(s).unwrap()
    }

    #[test]
    fn test_index_by_functor() {
        let mut base = RuleBase::new();
        base.add_permanent(rule("parent(bill, mary)."));
        base.add_permanent(rule("parent(mary, john)."));
        base.add_permanent(rule("ancestor(X, Y) :- parent(X, Y)."));
        assert_eq!(base.candidates("parent/2").len(), 2);
        assert_eq!(base.candidates("ancestor/2").len(), 1);
        assert!(base.candidates("missing/1").is_empty());
        assert!(base.has_functor("parent/2"));
        assert!(!base.has_functor("parent/3"));
    }

    #[test]
    fn test_duplicate_content_ignored() {
        let mut base = RuleBase::new();
        assert!(base.add_permanent(rule("p(a).")));
        assert!(!base.add_permanent(rule("p(a).")));
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_retract_by_origin() {
        let mut base = RuleBase::new();
        base.add_permanent(rule("p(a)."));
        base.add_ephemeral(rule("q(b) :- p(b)."), 7);
        base.add_ephemeral(rule("q(c) :- p(c)."), 8);
        let origins: BTreeSet<GoalId> = [7].into_iter().collect();
        assert_eq!(base.retract_by_origin(&origins), 1);
        assert_eq!(base.candidates("q/1").len(), 1);
        // permanent rules are untouched
        assert!(base.has_functor("p/1"));
        // retracted content may be re-added later
        assert!(base.add_ephemeral(rule("q(b) :- p(b)."), 9));
    }

    #[test]
    fn test_advertised_excludes_ephemeral() {
        let mut base = RuleBase::new();
        base.add_permanent(rule("p(a)."));
        base.add_ephemeral(rule("q(b) :- p(b)."), 1);
        let advertised = base.advertised_functors();
        assert!(advertised.contains("p/1"));
        assert!(!advertised.contains("q/1"));
    }
}

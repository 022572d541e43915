//! Horn clauses.
//!
//! A rule is a head literal and an ordered body; facts are rules with an
//! empty body. Rules are identified by the SHA-1 of their canonical printed
//! form.

use crate::error::EtbError;
use crate::term::Literal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub head: Literal,
    pub body: Vec<Literal>,
}

impl Rule {
    pub fn new(head: Literal, body: Vec<Literal>) -> Self {
        Rule { head, body }
    }

    pub fn fact(head: Literal) -> Self {
        Rule { head, body: Vec::new() }
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = self.head.vars();
        for b in &self.body {
            out.extend(b.vars());
        }
        out
    }

    /// Content hash identifying this rule.
    pub fn hash(&self) -> String {
        crate::sha1_hex(self.to_string().as_bytes())
    }

    /// Consistent fresh renaming of every variable, used before each
    /// resolution step so rule variables never collide with goal variables.
    pub fn rename_apart(&self, counter: &mut u64) -> Rule {
        let mut assigned: BTreeMap<String, String> = BTreeMap::new();
        let mut fresh = |v: &str| {
            assigned
                .entry(v.to_owned())
                .or_insert_with(|| {
                    *counter += 1;
                    format!("_r{}", counter)
                })
                .clone()
        };
        Rule {
            head: self.head.rename_vars(&mut fresh),
            body: self.body.iter().map(|b| b.rename_vars(&mut fresh)).collect(),
        }
    }

    pub fn to_wire(&self) -> Value {
        let mut items = vec![self.head.to_wire()];
        items.extend(self.body.iter().map(Literal::to_wire));
        json!({ "__Clause": items })
    }

    pub fn from_wire(value: &Value) -> Result<Rule, EtbError> {
        let items = value
            .as_object()
            .and_then(|o| o.get("__Clause"))
            .and_then(Value::as_array)
            .ok_or_else(|| EtbError::wire("missing __Clause tag"))?;
        if items.is_empty() {
            return Err(EtbError::wire("__Clause must have a head"));
        }
        let head = Literal::from_wire(&items[0])?;
        let body = items[1..]
            .iter()
            .map(Literal::from_wire)
            .collect::<Result<_, _>>()?;
        Ok(Rule { head, body })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "{}.", self.head)
        } else {
            write!(f, "{} :- ", self.head)?;
            for (i, b) in self.body.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", b)?;
            }
            write!(f, ".")
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Rule, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Rule::from_wire(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_rule, parse_rules};

    #[test]
    fn test_display_roundtrip() {
        let r = parse_rule("ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).").unwrap();
        assert_eq!(r.to_string(), "ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).");
        assert_eq!(parse_rule(&r.to_string()).unwrap(), r);
    }

    #[test]
    fn test_fact() {
        let r = parse_rule("parent(bill, mary).").unwrap();
        assert!(r.is_fact());
        assert_eq!(r.to_string(), "parent(bill, mary).");
    }

    #[test]
    fn test_hash_identifies_content() {
        let a = parse_rule("p(X) :- q(X).").unwrap();
        let b = parse_rule("p(X)  :-  q(X).").unwrap();
        let c = parse_rule("p(X) :- r(X).").unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_rename_apart_is_consistent() {
        let r = parse_rule("p(X, Y) :- q(X), r(Y, X).").unwrap();
        let mut counter = 0;
        let renamed = r.rename_apart(&mut counter);
        // same structure, disjoint variables, shared variables still shared
        assert!(renamed.vars().is_disjoint(&r.vars()));
        let rules = parse_rules(&renamed.to_string()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].vars().len(), 2);
    }

    #[test]
    fn test_wire_roundtrip() {
        let r = parse_rule("p(X) :- q(X, a).").unwrap();
        let json = serde_json::to_string(&r).unwrap();
        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}

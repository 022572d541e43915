//! Substitutions: finite maps from variable names to terms.
//!
//! Application is recursive until a fixpoint; composition is left-to-right.
//! The canonical printed form (`{X = a, Y = f(b)}`, keys sorted) is the
//! equality used for answer deduplication.

use crate::error::EtbError;
use crate::term::{Literal, Term};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subst {
    bindings: BTreeMap<String, Term>,
}

impl Subst {
    pub fn new() -> Self {
        Subst::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn get(&self, var: &str) -> Option<&Term> {
        self.bindings.get(var)
    }

    pub fn bind(&mut self, var: impl Into<String>, term: Term) {
        self.bindings.insert(var.into(), term);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.bindings.iter()
    }

    pub fn domain(&self) -> impl Iterator<Item = &String> {
        self.bindings.keys()
    }

    /// Apply to a term, substituting recursively until no bound variable
    /// remains. Chains are followed; a variable already being expanded is
    /// left as-is, so malformed (cyclic) substitutions cannot loop.
    pub fn apply(&self, term: &Term) -> Term {
        let mut expanding = Vec::new();
        self.apply_inner(term, &mut expanding)
    }

    fn apply_inner(&self, term: &Term, expanding: &mut Vec<String>) -> Term {
        match term {
            Term::Var(v) => match self.bindings.get(v) {
                Some(bound) if !expanding.iter().any(|e| e == v) => {
                    expanding.push(v.clone());
                    let out = self.apply_inner(bound, expanding);
                    expanding.pop();
                    out
                }
                _ => term.clone(),
            },
            Term::Compound(sym, args) => Term::Compound(
                sym.clone(),
                args.iter().map(|a| self.apply_inner(a, expanding)).collect(),
            ),
            Term::List(items) => Term::List(
                items
                    .iter()
                    .map(|a| self.apply_inner(a, expanding))
                    .collect(),
            ),
            Term::Map(entries) => Term::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.apply_inner(v, expanding)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn apply_literal(&self, literal: &Literal) -> Literal {
        Literal {
            pred: literal.pred.clone(),
            args: literal.args.iter().map(|a| self.apply(a)).collect(),
        }
    }

    /// Left-to-right composition: `(self . other)(t) = other(self(t))`.
    pub fn compose(&self, other: &Subst) -> Subst {
        let mut out = Subst::new();
        for (v, t) in &self.bindings {
            out.bind(v.clone(), other.apply(t));
        }
        for (v, t) in &other.bindings {
            if !out.bindings.contains_key(v) {
                out.bind(v.clone(), t.clone());
            }
        }
        out
    }

    /// Keep only the bindings for the given variables.
    pub fn restrict(&self, vars: &BTreeSet<String>) -> Subst {
        Subst {
            bindings: self
                .bindings
                .iter()
                .filter(|(v, _)| vars.contains(*v))
                .map(|(v, t)| (v.clone(), t.clone()))
                .collect(),
        }
    }

    /// Resolve every binding fully through the substitution itself.
    pub fn resolved(&self) -> Subst {
        Subst {
            bindings: self
                .bindings
                .iter()
                .map(|(v, t)| (v.clone(), self.apply(t)))
                .collect(),
        }
    }

    /// Canonical key for deduplication.
    pub fn canonical_key(&self) -> String {
        self.to_string()
    }

    pub fn to_wire(&self) -> Value {
        let pairs: Vec<Value> = self
            .bindings
            .iter()
            .map(|(v, t)| json!([{ "__Var": v }, t.to_wire()]))
            .collect();
        json!({ "__Subst": pairs })
    }

    pub fn from_wire(value: &Value) -> Result<Subst, EtbError> {
        let pairs = value
            .as_object()
            .and_then(|o| o.get("__Subst"))
            .and_then(Value::as_array)
            .ok_or_else(|| EtbError::wire("missing __Subst tag"))?;
        let mut out = Subst::new();
        for pair in pairs {
            let items = pair
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| EtbError::wire("substitution binding must be a pair"))?;
            let var = match Term::from_wire(&items[0])? {
                Term::Var(v) => v,
                other => {
                    return Err(EtbError::wire(format!(
                        "binding key must be a variable, got {}",
                        other
                    )))
                }
            };
            out.bind(var, Term::from_wire(&items[1])?);
        }
        Ok(out)
    }
}

impl fmt::Display for Subst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (v, t)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", v, t)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for Subst {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Subst {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Subst, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Subst::from_wire(&value).map_err(D::Error::custom)
    }
}

impl FromIterator<(String, Term)> for Subst {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Subst {
            bindings: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(s: &str) -> Term {
        crate::parser::parse_term(s).unwrap()
    }

    #[test]
    fn test_apply_recursive() {
        let mut s = Subst::new();
        s.bind("X", term("f(Y)"));
        s.bind("Y", term("a"));
        assert_eq!(s.apply(&term("g(X)")), term("g(f(a))"));
    }

    #[test]
    fn test_compose_left_to_right() {
        let mut s1 = Subst::new();
        s1.bind("X", term("f(Y)"));
        let mut s2 = Subst::new();
        s2.bind("Y", term("b"));
        let c = s1.compose(&s2);
        assert_eq!(c.apply(&term("X")), term("f(b)"));
        assert_eq!(c.apply(&term("Y")), term("b"));
    }

    #[test]
    fn test_restrict() {
        let mut s = Subst::new();
        s.bind("X", term("a"));
        s.bind("Y", term("b"));
        let vars: std::collections::BTreeSet<String> = ["X".to_string()].into_iter().collect();
        let r = s.restrict(&vars);
        assert_eq!(r.len(), 1);
        assert_eq!(r.get("X"), Some(&term("a")));
    }

    #[test]
    fn test_canonical_key_is_order_insensitive() {
        let mut s1 = Subst::new();
        s1.bind("Y", term("b"));
        s1.bind("X", term("a"));
        let mut s2 = Subst::new();
        s2.bind("X", term("a"));
        s2.bind("Y", term("b"));
        assert_eq!(s1.canonical_key(), s2.canonical_key());
    }

    #[test]
    fn test_wire_roundtrip_preserves_names_and_values() {
        let mut s = Subst::new();
        s.bind("X", term("f(a, 3)"));
        s.bind("Html", term("{file: \"out.html\", sha1: \"12ab\"}"));
        let json = serde_json::to_string(&s).unwrap();
        let back: Subst = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

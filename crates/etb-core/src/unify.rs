//! First-order unification.
//!
//! The engine never constructs cyclic terms: binding a variable to a term
//! containing that variable fails the unification instead.

use crate::subst::Subst;
use crate::term::{Literal, Term};

/// Most general unifier of two terms, fully resolved, or `None`.
pub fn unify_terms(a: &Term, b: &Term) -> Option<Subst> {
    let mut s = Subst::new();
    if unify(a, b, &mut s) {
        Some(s.resolved())
    } else {
        None
    }
}

/// Most general unifier of two literals (same predicate, same arity,
/// arguments pairwise unifiable), fully resolved.
pub fn unify_literals(a: &Literal, b: &Literal) -> Option<Subst> {
    if a.pred != b.pred || a.arity() != b.arity() {
        return None;
    }
    let mut s = Subst::new();
    for (x, y) in a.args.iter().zip(&b.args) {
        if !unify(x, y, &mut s) {
            return None;
        }
    }
    Some(s.resolved())
}

fn walk(term: &Term, s: &Subst) -> Term {
    let mut cur = term.clone();
    while let Term::Var(v) = &cur {
        match s.get(v) {
            Some(next) => cur = next.clone(),
            None => break,
        }
    }
    cur
}

fn occurs(var: &str, term: &Term, s: &Subst) -> bool {
    match walk(term, s) {
        Term::Var(v) => v == var,
        Term::Compound(_, args) | Term::List(args) => {
            args.iter().any(|a| occurs(var, a, s))
        }
        Term::Map(entries) => entries.values().any(|v| occurs(var, v, s)),
        _ => false,
    }
}

fn unify(a: &Term, b: &Term, s: &mut Subst) -> bool {
    let a = walk(a, s);
    let b = walk(b, s);
    match (a, b) {
        (Term::Var(x), Term::Var(y)) if x == y => true,
        (Term::Var(x), t) | (t, Term::Var(x)) => {
            if occurs(&x, &t, s) {
                // would build a cyclic term
                false
            } else {
                s.bind(x, t);
                true
            }
        }
        (Term::Id(x), Term::Id(y)) => x == y,
        (Term::Str(x), Term::Str(y)) => x == y,
        (Term::Num(x), Term::Num(y)) => x == y,
        (Term::Bool(x), Term::Bool(y)) => x == y,
        (Term::File(x), Term::File(y)) => x == y,
        (Term::Compound(f, xs), Term::Compound(g, ys)) => {
            f == g && xs.len() == ys.len() && xs.iter().zip(&ys).all(|(x, y)| unify(x, y, s))
        }
        (Term::List(xs), Term::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(&ys).all(|(x, y)| unify(x, y, s))
        }
        (Term::Map(xs), Term::Map(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(k, x)| match ys.get(k) {
                    Some(y) => unify(x, y, s),
                    None => false,
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Literal {
        crate::parser::parse_literal(s).unwrap()
    }

    fn term(s: &str) -> Term {
        crate::parser::parse_term(s).unwrap()
    }

    #[test]
    fn test_unify_simple() {
        let s = unify_literals(&lit("p(X, b)"), &lit("p(a, Y)")).unwrap();
        assert_eq!(s.get("X"), Some(&term("a")));
        assert_eq!(s.get("Y"), Some(&term("b")));
    }

    #[test]
    fn test_unify_shared_variable() {
        let s = unify_literals(&lit("p(X, X)"), &lit("p(a, Y)")).unwrap();
        assert_eq!(s.apply(&term("Y")), term("a"));
    }

    #[test]
    fn test_unify_fails_on_clash() {
        assert!(unify_literals(&lit("p(a)"), &lit("p(b)")).is_none());
        assert!(unify_literals(&lit("p(a)"), &lit("q(a)")).is_none());
        assert!(unify_literals(&lit("p(a)"), &lit("p(a, b)")).is_none());
    }

    #[test]
    fn test_unify_nested() {
        let s = unify_literals(&lit("p(f(X), [1, Y])"), &lit("p(f(a), [1, 2])")).unwrap();
        assert_eq!(s.get("X"), Some(&term("a")));
        assert_eq!(s.get("Y"), Some(&term("2")));
    }

    #[test]
    fn test_cycle_guard() {
        // X = f(X) must fail, not build a cyclic term
        assert!(unify_terms(&term("X"), &term("f(X)")).is_none());
        assert!(unify_literals(&lit("p(X, f(X))"), &lit("p(Y, Y)")).is_none());
    }

    #[test]
    fn test_resolved_mgu_has_no_chains() {
        let s = unify_literals(&lit("p(X, Y)"), &lit("p(Y, a)")).unwrap();
        assert_eq!(s.apply(&term("X")), term("a"));
        // after resolution the binding itself is fully ground
        for (_, t) in s.iter() {
            assert!(t.is_ground());
        }
    }
}

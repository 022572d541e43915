//! Wrapper predicates: tool-backed semantic attachments.
//!
//! A wrapper is a capability object registered under `pred/arity` with a
//! mode/kind signature. Resolving a literal yields one of the outcome
//! variants; the engine turns outcomes into claims, ephemeral rules or
//! error observations. Mode violations never crash the engine - signature
//! checking happens before invocation and failures surface as `errors`.

pub mod builtin;
pub mod subprocess;

use crate::filestore::FileStore;
use async_trait::async_trait;
use etb_core::{ArgKind, ArgMode, ArgSpec, FileRef, Literal, Subst, Term};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What a wrapper invocation produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The literal holds as given; one ground claim.
    Success,
    /// The literal does not hold; no claim.
    Failure,
    /// The literal holds under each substitution; one claim per element.
    Substitutions(Vec<Subst>),
    /// For each substitution s and each query q, add the ephemeral rule
    /// `s(head) :- s(q)`. Expresses recursion through the engine.
    Queries(Vec<Subst>, Vec<Literal>),
    /// For each (substitution, body) pair, add the ephemeral rule
    /// `s(head) :- s(body)`.
    Lemmata(Vec<(Subst, Vec<Literal>)>),
    /// Tool or argument failure, observable as an error claim.
    Errors(Vec<String>),
}

/// Ambient services handed to a wrapper for one invocation.
pub struct WrapperContext {
    pub store: Arc<FileStore>,
    /// Transient workspace directory for this invocation.
    pub workspace: PathBuf,
    pub timeout: Duration,
}

#[async_trait]
pub trait Wrapper: Send + Sync {
    fn name(&self) -> &str;
    fn signature(&self) -> &[ArgSpec];
    async fn resolve(&self, ctx: &WrapperContext, literal: &Literal) -> Outcome;
}

#[derive(Default)]
pub struct WrapperRegistry {
    by_functor: HashMap<String, Arc<dyn Wrapper>>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        WrapperRegistry::default()
    }

    /// Registry preloaded with the demo tool set.
    pub fn with_builtins() -> Self {
        let mut registry = WrapperRegistry::new();
        for wrapper in builtin::all() {
            registry.register(wrapper);
        }
        registry
    }

    pub fn register(&mut self, wrapper: Arc<dyn Wrapper>) {
        let functor = format!("{}/{}", wrapper.name(), wrapper.signature().len());
        self.by_functor.insert(functor, wrapper);
    }

    pub fn get(&self, functor: &str) -> Option<Arc<dyn Wrapper>> {
        self.by_functor.get(functor).cloned()
    }

    pub fn contains(&self, functor: &str) -> bool {
        self.by_functor.contains_key(functor)
    }

    pub fn functors(&self) -> Vec<String> {
        let mut out: Vec<String> = self.by_functor.keys().cloned().collect();
        out.sort();
        out
    }
}

/// Check a literal against a signature. `Err` carries the violation
/// messages that become an error claim.
pub fn check_modes(signature: &[ArgSpec], literal: &Literal) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();
    if signature.len() != literal.arity() {
        problems.push(format!(
            "{} expects {} arguments, got {}",
            literal.pred,
            signature.len(),
            literal.arity()
        ));
        return Err(problems);
    }
    for (spec, arg) in signature.iter().zip(&literal.args) {
        match spec.mode {
            ArgMode::Bound => {
                if !arg.is_ground() {
                    problems.push(format!("argument {} (+{}) must be bound", spec.name, spec.name));
                    continue;
                }
                match spec.kind {
                    ArgKind::File => {
                        if !matches!(arg, Term::File(_)) {
                            problems.push(format!(
                                "argument {} must be a file reference, got {}",
                                spec.name, arg
                            ));
                        }
                    }
                    ArgKind::Files => {
                        let ok = matches!(arg, Term::List(items)
                            if items.iter().all(|t| matches!(t, Term::File(_))));
                        if !ok {
                            problems.push(format!(
                                "argument {} must be a list of file references, got {}",
                                spec.name, arg
                            ));
                        }
                    }
                    ArgKind::Handle => {
                        if !matches!(arg, Term::Map(_)) {
                            problems.push(format!(
                                "argument {} must be a tool handle, got {}",
                                spec.name, arg
                            ));
                        }
                    }
                    ArgKind::Value => {}
                }
            }
            ArgMode::Free => {
                if !matches!(arg, Term::Var(_)) {
                    problems.push(format!(
                        "argument {} (-{}) must be a variable, got {}",
                        spec.name, spec.name, arg
                    ));
                }
            }
            ArgMode::Any => {}
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// File references among bound file-kind arguments; their blobs must be
/// locally resolvable before the wrapper runs.
pub fn input_filerefs(signature: &[ArgSpec], literal: &Literal) -> Vec<FileRef> {
    let mut out = Vec::new();
    for (spec, arg) in signature.iter().zip(&literal.args) {
        match (spec.kind, arg) {
            (ArgKind::File, Term::File(r)) => out.push(r.clone()),
            (ArgKind::Files, Term::List(items)) => {
                for item in items {
                    if let Term::File(r) = item {
                        out.push(r.clone());
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Variables appearing in output (`-`) positions; a substitutions outcome
/// may only bind these.
pub fn output_vars(signature: &[ArgSpec], literal: &Literal) -> std::collections::BTreeSet<String> {
    let mut out = std::collections::BTreeSet::new();
    for (spec, arg) in signature.iter().zip(&literal.args) {
        if spec.mode == ArgMode::Free {
            arg.collect_vars(&mut out);
        }
    }
    out
}

/// Digest naming one wrapper invocation and its produced binding, used in
/// the claim's derivation edge.
pub fn invocation_digest(name: &str, literal: &Literal, binding: &Subst) -> String {
    etb_core::sha1_hex(format!("{}|{}|{}", name, literal, binding).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etb_core::parser::parse_literal;

    fn sig(s: &str) -> Vec<ArgSpec> {
        ArgSpec::parse_signature(s).unwrap()
    }

    #[test]
    fn test_check_modes_accepts_well_moded_call() {
        let signature = sig("+low:value, +up:value, -res:value");
        let literal = parse_literal("in_range(1, 4, X)").unwrap();
        assert!(check_modes(&signature, &literal).is_ok());
    }

    #[test]
    fn test_check_modes_rejects_unbound_input() {
        let signature = sig("+low:value, +up:value, -res:value");
        let literal = parse_literal("in_range(L, 4, X)").unwrap();
        assert!(check_modes(&signature, &literal).is_err());
    }

    #[test]
    fn test_check_modes_rejects_bound_output() {
        let signature = sig("+low:value, +up:value, -res:value");
        let literal = parse_literal("in_range(1, 4, 9)").unwrap();
        let problems = check_modes(&signature, &literal).unwrap_err();
        assert!(problems[0].contains("must be a variable"));
    }

    #[test]
    fn test_check_modes_file_kind() {
        let signature = sig("+opts:value, +src:file, -out:file");
        let good = parse_literal("asciidoc(\"\", {file: \"d.adoc\", sha1: \"9a\"}, H)").unwrap();
        assert!(check_modes(&signature, &good).is_ok());
        let bad = parse_literal("asciidoc(\"\", notafile, H)").unwrap();
        assert!(check_modes(&signature, &bad).is_err());
    }

    #[test]
    fn test_input_filerefs() {
        let signature = sig("+src:file, +more:files, -out:file");
        let literal = parse_literal(
            "t({file: \"a\", sha1: \"01\"}, [{file: \"b\", sha1: \"02\"}], Out)",
        )
        .unwrap();
        let refs = input_filerefs(&signature, &literal);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_output_vars() {
        let signature = sig("+n:value, -res:value");
        let literal = parse_literal("f(3, X)").unwrap();
        let vars = output_vars(&signature, &literal);
        assert!(vars.contains("X"));
        assert_eq!(vars.len(), 1);
    }
}

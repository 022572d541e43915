//! Builtin demo wrappers.
//!
//! The demo tool set exercises every outcome variant: `in_range` produces
//! substitutions, `comp` succeeds or fails on compositeness, `verycomposite`
//! emits lemmata, and `ping`/`pong` drive mutual recursion through dynamic
//! subgoals.

use super::{Outcome, Wrapper, WrapperContext};
use async_trait::async_trait;
use etb_core::{ArgSpec, Literal, Subst, Term};
use std::sync::Arc;

/// All builtin wrappers, ready for registration.
pub fn all() -> Vec<Arc<dyn Wrapper>> {
    vec![
        Arc::new(InRange::new()) as Arc<dyn Wrapper>,
        Arc::new(Comp::new()),
        Arc::new(VeryComposite::new()),
        Arc::new(PingPong::new("ping", "pong")),
        Arc::new(PingPong::new("pong", "ping")),
    ]
}

fn num_arg(literal: &Literal, index: usize) -> Option<i64> {
    match literal.args.get(index) {
        Some(Term::Num(n)) => Some(*n),
        _ => None,
    }
}

fn var_arg(literal: &Literal, index: usize) -> Option<String> {
    match literal.args.get(index) {
        Some(Term::Var(v)) => Some(v.clone()),
        _ => None,
    }
}

/// `in_range(+low:value, +up:value, -res:value)` - binds `res` to every
/// integer in `[low, up]`.
pub struct InRange {
    signature: Vec<ArgSpec>,
}

impl InRange {
    pub fn new() -> Self {
        InRange {
            signature: ArgSpec::parse_signature("+low:value, +up:value, -res:value")
                .expect("builtin signature"),
        }
    }
}

#[async_trait]
impl Wrapper for InRange {
    fn name(&self) -> &str {
        "in_range"
    }

    fn signature(&self) -> &[ArgSpec] {
        &self.signature
    }

    async fn resolve(&self, _ctx: &WrapperContext, literal: &Literal) -> Outcome {
        let (low, up, res) = match (num_arg(literal, 0), num_arg(literal, 1), var_arg(literal, 2)) {
            (Some(low), Some(up), Some(res)) => (low, up, res),
            _ => return Outcome::Errors(vec![format!("in_range: bad arguments in {}", literal)]),
        };
        if low > up {
            return Outcome::Failure;
        }
        let substs = (low..=up)
            .map(|v| {
                let mut s = Subst::new();
                s.bind(res.clone(), Term::Num(v));
                s
            })
            .collect();
        Outcome::Substitutions(substs)
    }
}

fn is_composite(n: i64) -> bool {
    if n < 4 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return true;
        }
        d += 1;
    }
    false
}

/// `comp(+n:value)` - holds when `n` is composite.
pub struct Comp {
    signature: Vec<ArgSpec>,
}

impl Comp {
    pub fn new() -> Self {
        Comp {
            signature: ArgSpec::parse_signature("+n:value").expect("builtin signature"),
        }
    }
}

#[async_trait]
impl Wrapper for Comp {
    fn name(&self) -> &str {
        "comp"
    }

    fn signature(&self) -> &[ArgSpec] {
        &self.signature
    }

    async fn resolve(&self, _ctx: &WrapperContext, literal: &Literal) -> Outcome {
        match num_arg(literal, 0) {
            Some(n) if is_composite(n) => Outcome::Success,
            Some(_) => Outcome::Failure,
            None => Outcome::Errors(vec![format!("comp: bad argument in {}", literal)]),
        }
    }
}

/// `verycomposite(+n:value, +m:value)` - holds when the `m` consecutive
/// integers starting at `n` are all composite. Expressed as a lemma so the
/// compositeness checks run as ordinary subgoals.
pub struct VeryComposite {
    signature: Vec<ArgSpec>,
}

impl VeryComposite {
    pub fn new() -> Self {
        VeryComposite {
            signature: ArgSpec::parse_signature("+n:value, +m:value").expect("builtin signature"),
        }
    }
}

#[async_trait]
impl Wrapper for VeryComposite {
    fn name(&self) -> &str {
        "verycomposite"
    }

    fn signature(&self) -> &[ArgSpec] {
        &self.signature
    }

    async fn resolve(&self, _ctx: &WrapperContext, literal: &Literal) -> Outcome {
        let (n, m) = match (num_arg(literal, 0), num_arg(literal, 1)) {
            (Some(n), Some(m)) if m > 0 => (n, m),
            _ => {
                return Outcome::Errors(vec![format!(
                    "verycomposite: bad arguments in {}",
                    literal
                )])
            }
        };
        let body = (n..n + m)
            .map(|k| Literal::new("comp", vec![Term::Num(k)]))
            .collect();
        Outcome::Lemmata(vec![(Subst::new(), body)])
    }
}

/// `ping(+n:value)` / `pong(+n:value)` - mutually recursive through the
/// queries outcome: `ping(n)` emits the dynamic subgoal `pong(n-1)` and
/// vice versa; both bottom out at 0.
pub struct PingPong {
    name: &'static str,
    other: &'static str,
    signature: Vec<ArgSpec>,
}

impl PingPong {
    pub fn new(name: &'static str, other: &'static str) -> Self {
        PingPong {
            name,
            other,
            signature: ArgSpec::parse_signature("+n:value").expect("builtin signature"),
        }
    }
}

#[async_trait]
impl Wrapper for PingPong {
    fn name(&self) -> &str {
        self.name
    }

    fn signature(&self) -> &[ArgSpec] {
        &self.signature
    }

    async fn resolve(&self, _ctx: &WrapperContext, literal: &Literal) -> Outcome {
        match num_arg(literal, 0) {
            Some(0) => Outcome::Success,
            Some(n) if n > 0 => Outcome::Queries(
                vec![Subst::new()],
                vec![Literal::new(self.other, vec![Term::Num(n - 1)])],
            ),
            Some(_) => Outcome::Failure,
            None => Outcome::Errors(vec![format!("{}: bad argument in {}", self.name, literal)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::FileStore;
    use etb_core::parser::parse_literal;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn resolve(wrapper: &dyn Wrapper, goal: &str) -> Outcome {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("wd")).unwrap());
        let workspace = store.workspace("t").unwrap();
        let ctx = WrapperContext {
            store,
            workspace,
            timeout: Duration::from_secs(5),
        };
        wrapper.resolve(&ctx, &parse_literal(goal).unwrap()).await
    }

    #[tokio::test]
    async fn test_in_range_substitutions() {
        match resolve(&InRange::new(), "in_range(1, 4, X)").await {
            Outcome::Substitutions(substs) => {
                assert_eq!(substs.len(), 4);
                let values: Vec<_> = substs.iter().map(|s| s.get("X").cloned().unwrap()).collect();
                assert_eq!(values, vec![Term::Num(1), Term::Num(2), Term::Num(3), Term::Num(4)]);
            }
            other => panic!("expected substitutions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_in_range_empty() {
        assert!(matches!(
            resolve(&InRange::new(), "in_range(4, 1, X)").await,
            Outcome::Failure
        ));
    }

    #[tokio::test]
    async fn test_comp() {
        assert!(matches!(resolve(&Comp::new(), "comp(8)").await, Outcome::Success));
        assert!(matches!(resolve(&Comp::new(), "comp(7)").await, Outcome::Failure));
        assert!(matches!(resolve(&Comp::new(), "comp(2)").await, Outcome::Failure));
    }

    #[tokio::test]
    async fn test_verycomposite_lemma_shape() {
        match resolve(&VeryComposite::new(), "verycomposite(8, 3)").await {
            Outcome::Lemmata(pairs) => {
                assert_eq!(pairs.len(), 1);
                let (_, body) = &pairs[0];
                let printed: Vec<String> = body.iter().map(|l| l.to_string()).collect();
                assert_eq!(printed, vec!["comp(8)", "comp(9)", "comp(10)"]);
            }
            other => panic!("expected lemmata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_emits_pong_subgoal() {
        match resolve(&PingPong::new("ping", "pong"), "ping(5)").await {
            Outcome::Queries(substs, queries) => {
                assert_eq!(substs.len(), 1);
                assert_eq!(queries[0].to_string(), "pong(4)");
            }
            other => panic!("expected queries, got {:?}", other),
        }
        assert!(matches!(
            resolve(&PingPong::new("ping", "pong"), "ping(0)").await,
            Outcome::Success
        ));
    }
}

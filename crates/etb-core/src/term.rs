//! The term model.
//!
//! Terms are immutable first-order values: variables, constants, compounds,
//! lists, maps and content-addressed file references. The `Display` form is
//! the canonical serialisation - parsing it back yields an equal term - and
//! its SHA-1 is the stable content key used for tabling and cross-node
//! identity.
//!
//! On the wire, terms use the tag-discriminated JSON encoding inherited from
//! the original bus protocol: `{"__Var": name}`, `{"__IdConst": s}`,
//! `{"__StringConst": s}`, `{"__NumberConst": n}`, `{"__BoolConst": b}`,
//! `{"__Array": [...]}`, `{"__Map": {...}}`, `{"__Literal": [pred, args...]}`.
//! File references are plain `{"file": path, "sha1": hex}` objects.

use crate::error::EtbError;
use crate::fileref::FileRef;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Variable names start with an uppercase letter or an underscore; every
/// other symbol is an id constant.
pub fn is_var_name(s: &str) -> bool {
    s.chars()
        .next()
        .map(|c| c.is_ascii_uppercase() || c == '_')
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Var(String),
    /// Symbolic atom (`bill`, `sal3`).
    Id(String),
    Str(String),
    Num(i64),
    Bool(bool),
    /// Nested application term (`f(a, X)`).
    Compound(String, Vec<Term>),
    List(Vec<Term>),
    Map(BTreeMap<String, Term>),
    File(FileRef),
}

impl Term {
    /// Smart constructor for symbols: classifies by leading character.
    pub fn symbol(name: impl Into<String>) -> Term {
        let name = name.into();
        if is_var_name(&name) {
            Term::Var(name)
        } else {
            Term::Id(name)
        }
    }

    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) => false,
            Term::Id(_) | Term::Str(_) | Term::Num(_) | Term::Bool(_) | Term::File(_) => true,
            Term::Compound(_, args) | Term::List(args) => args.iter().all(Term::is_ground),
            Term::Map(entries) => entries.values().all(Term::is_ground),
        }
    }

    /// Collect free variable names, left to right.
    pub fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Term::Var(v) => {
                out.insert(v.clone());
            }
            Term::Id(_) | Term::Str(_) | Term::Num(_) | Term::Bool(_) | Term::File(_) => {}
            Term::Compound(_, args) | Term::List(args) => {
                for a in args {
                    a.collect_vars(out);
                }
            }
            Term::Map(entries) => {
                for v in entries.values() {
                    v.collect_vars(out);
                }
            }
        }
    }

    /// Rewrite every variable through `f`.
    pub fn rename_vars(&self, f: &mut impl FnMut(&str) -> String) -> Term {
        match self {
            Term::Var(v) => Term::Var(f(v)),
            Term::Compound(sym, args) => {
                Term::Compound(sym.clone(), args.iter().map(|a| a.rename_vars(f)).collect())
            }
            Term::List(items) => Term::List(items.iter().map(|a| a.rename_vars(f)).collect()),
            Term::Map(entries) => Term::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.rename_vars(f)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Stable content key: SHA-1 of the canonical printed form.
    pub fn key(&self) -> String {
        crate::sha1_hex(self.to_string().as_bytes())
    }

    /// Tagged JSON wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            Term::Var(v) => json!({ "__Var": v }),
            Term::Id(s) => json!({ "__IdConst": s }),
            Term::Str(s) => json!({ "__StringConst": s }),
            Term::Num(n) => json!({ "__NumberConst": n }),
            Term::Bool(b) => json!({ "__BoolConst": b }),
            Term::Compound(sym, args) => {
                let mut items = vec![Value::String(sym.clone())];
                items.extend(args.iter().map(Term::to_wire));
                json!({ "__Literal": items })
            }
            Term::List(items) => {
                json!({ "__Array": items.iter().map(Term::to_wire).collect::<Vec<_>>() })
            }
            Term::Map(entries) => {
                let obj: serde_json::Map<String, Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_wire()))
                    .collect();
                json!({ "__Map": obj })
            }
            Term::File(r) => json!({ "file": r.file, "sha1": r.sha1 }),
        }
    }

    /// Decode the tagged JSON wire form. Bare JSON scalars are accepted as
    /// the corresponding constants.
    pub fn from_wire(value: &Value) -> Result<Term, EtbError> {
        match value {
            Value::String(s) => Ok(Term::Str(s.clone())),
            Value::Bool(b) => Ok(Term::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Term::Num)
                .ok_or_else(|| EtbError::wire(format!("non-integer number {}", n))),
            Value::Object(obj) => {
                if let Some(v) = obj.get("__Var") {
                    let name = expect_str(v, "__Var")?;
                    return Ok(Term::Var(name));
                }
                if let Some(v) = obj.get("__IdConst") {
                    return Ok(Term::Id(expect_str(v, "__IdConst")?));
                }
                if let Some(v) = obj.get("__StringConst") {
                    return Ok(Term::Str(expect_str(v, "__StringConst")?));
                }
                if let Some(v) = obj.get("__BoolConst") {
                    return match v {
                        Value::Bool(b) => Ok(Term::Bool(*b)),
                        Value::String(s) => Ok(Term::Bool(s == "true" || s == "True")),
                        other => Err(EtbError::wire(format!("bad __BoolConst {}", other))),
                    };
                }
                if let Some(v) = obj.get("__NumberConst") {
                    return match v {
                        Value::Number(n) => n
                            .as_i64()
                            .map(Term::Num)
                            .ok_or_else(|| EtbError::wire(format!("non-integer {}", n))),
                        // the original bus serialised numbers as strings
                        Value::String(s) => s
                            .parse::<i64>()
                            .map(Term::Num)
                            .map_err(|_| EtbError::wire(format!("bad __NumberConst {}", s))),
                        other => Err(EtbError::wire(format!("bad __NumberConst {}", other))),
                    };
                }
                if let Some(v) = obj.get("__Array") {
                    let items = expect_array(v, "__Array")?;
                    let terms = items.iter().map(Term::from_wire).collect::<Result<_, _>>()?;
                    return Ok(Term::List(terms));
                }
                if let Some(v) = obj.get("__Map") {
                    let entries = v
                        .as_object()
                        .ok_or_else(|| EtbError::wire("__Map payload must be an object"))?;
                    let mut map = BTreeMap::new();
                    for (k, val) in entries {
                        map.insert(k.clone(), Term::from_wire(val)?);
                    }
                    return Ok(Term::Map(map));
                }
                if let Some(v) = obj.get("__Literal") {
                    let items = expect_array(v, "__Literal")?;
                    let (sym, args) = decode_application(items)?;
                    return Ok(Term::Compound(sym, args));
                }
                // untagged {"file": ..., "sha1": ...} object
                if let (Some(Value::String(file)), Some(Value::String(sha1))) =
                    (obj.get("file"), obj.get("sha1"))
                {
                    if obj.len() == 2 {
                        return Ok(Term::File(FileRef::new(file.clone(), sha1.clone())));
                    }
                }
                Err(EtbError::wire(format!("unrecognised term object {}", value)))
            }
            other => Err(EtbError::wire(format!("unrecognised term {}", other))),
        }
    }
}

fn expect_str(v: &Value, tag: &str) -> Result<String, EtbError> {
    v.as_str()
        .map(str::to_owned)
        .ok_or_else(|| EtbError::wire(format!("{} payload must be a string", tag)))
}

fn expect_array<'a>(v: &'a Value, tag: &str) -> Result<&'a Vec<Value>, EtbError> {
    v.as_array()
        .ok_or_else(|| EtbError::wire(format!("{} payload must be an array", tag)))
}

fn decode_application(items: &[Value]) -> Result<(String, Vec<Term>), EtbError> {
    let sym = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| EtbError::wire("__Literal must start with a predicate symbol"))?;
    let args = items[1..]
        .iter()
        .map(Term::from_wire)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((sym.to_owned(), args))
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            other => write!(f, "{}", other)?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{}", v),
            Term::Id(s) => write!(f, "{}", s),
            Term::Str(s) => write_quoted(f, s),
            Term::Num(n) => write!(f, "{}", n),
            Term::Bool(b) => write!(f, "{}", b),
            Term::Compound(sym, args) => {
                write!(f, "{}(", sym)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Term::List(items) => {
                write!(f, "[")?;
                for (i, a) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, "]")
            }
            Term::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Term::File(r) => write!(f, "{}", r),
        }
    }
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Term, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Term::from_wire(&value).map_err(D::Error::custom)
    }
}

/// A literal: a predicate symbol applied to argument terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal {
    pub pred: String,
    pub args: Vec<Term>,
}

impl Literal {
    pub fn new(pred: impl Into<String>, args: Vec<Term>) -> Self {
        Literal {
            pred: pred.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// `pred/arity`, the indexing and advertisement key.
    pub fn functor(&self) -> String {
        format!("{}/{}", self.pred, self.arity())
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_ground)
    }

    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for a in &self.args {
            a.collect_vars(&mut out);
        }
        out
    }

    pub fn rename_vars(&self, f: &mut impl FnMut(&str) -> String) -> Literal {
        Literal {
            pred: self.pred.clone(),
            args: self.args.iter().map(|a| a.rename_vars(f)).collect(),
        }
    }

    /// Canonical form with variables renamed `_0, _1, ...` in order of first
    /// occurrence. Alpha-equivalent literals have equal fingerprints.
    pub fn canonical(&self) -> Literal {
        let mut assigned: BTreeMap<String, String> = BTreeMap::new();
        let mut next = 0usize;
        self.rename_vars(&mut |v| {
            assigned
                .entry(v.to_owned())
                .or_insert_with(|| {
                    let name = format!("_{}", next);
                    next += 1;
                    name
                })
                .clone()
        })
    }

    /// SHA-1 of the canonical printed form; the cross-node goal identity.
    pub fn fingerprint(&self) -> String {
        crate::sha1_hex(self.canonical().to_string().as_bytes())
    }

    /// Stable content key of this exact literal (variables not renamed).
    pub fn key(&self) -> String {
        crate::sha1_hex(self.to_string().as_bytes())
    }

    pub fn to_wire(&self) -> Value {
        let mut items = vec![Value::String(self.pred.clone())];
        items.extend(self.args.iter().map(Term::to_wire));
        json!({ "__Literal": items })
    }

    pub fn from_wire(value: &Value) -> Result<Literal, EtbError> {
        let obj = value
            .as_object()
            .ok_or_else(|| EtbError::wire("literal must be an object"))?;
        let items = obj
            .get("__Literal")
            .and_then(Value::as_array)
            .ok_or_else(|| EtbError::wire("missing __Literal tag"))?;
        let (pred, args) = decode_application(items)?;
        Ok(Literal { pred, args })
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.pred)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Literal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Literal, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Literal::from_wire(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Literal {
        crate::parser::parse_literal(s).unwrap()
    }

    #[test]
    fn test_display_roundtrip() {
        for text in [
            "parent(bill, mary)",
            "p(X, \"a b\", 42, true, [1, 2], f(Y))",
            "q()",
        ] {
            let l = lit(text);
            assert_eq!(l.to_string(), text);
            assert_eq!(lit(&l.to_string()), l);
        }
    }

    #[test]
    fn test_fingerprint_alpha_equivalence() {
        assert_eq!(lit("p(X, Y, X)").fingerprint(), lit("p(A, B, A)").fingerprint());
        assert_ne!(lit("p(X, Y, X)").fingerprint(), lit("p(A, B, B)").fingerprint());
        assert_ne!(lit("p(X)").fingerprint(), lit("q(X)").fingerprint());
    }

    #[test]
    fn test_wire_roundtrip() {
        let l = lit("p(X, \"s\", 7, true, [a, B], {k: v}, g(1))");
        let json = serde_json::to_string(&l).unwrap();
        let back: Literal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, l);
    }

    #[test]
    fn test_wire_tags() {
        let v = Term::Var("X".into()).to_wire();
        assert_eq!(v, serde_json::json!({"__Var": "X"}));
        let n = Term::Num(3).to_wire();
        assert_eq!(n, serde_json::json!({"__NumberConst": 3}));
        // numbers serialised as strings (old peers) still decode
        let old = serde_json::json!({"__NumberConst": "3"});
        assert_eq!(Term::from_wire(&old).unwrap(), Term::Num(3));
    }

    #[test]
    fn test_fileref_term() {
        let t = Term::File(FileRef::new("doc.adoc", "9af1"));
        let w = t.to_wire();
        assert_eq!(w, serde_json::json!({"file": "doc.adoc", "sha1": "9af1"}));
        assert_eq!(Term::from_wire(&w).unwrap(), t);
        assert!(t.is_ground());
    }

    #[test]
    fn test_groundness() {
        assert!(lit("p(a, 1, \"s\")").is_ground());
        assert!(!lit("p(a, X)").is_ground());
        assert!(!lit("p([a, [b, Y]])").is_ground());
    }
}

//! Wrapper predicate signatures.
//!
//! Each argument carries a mode (`+` must be bound, `-` must be a variable,
//! or either) and a kind (`value`, `file`, `files`, `handle`). Signatures
//! are written the way tool authors write them: `"+low:value, -res:file"`.

use crate::error::EtbError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgMode {
    /// `+` - the argument must be bound at call time.
    Bound,
    /// `-` - the argument must be an unbound variable; the wrapper binds it.
    Free,
    /// No marker - either is accepted.
    Any,
}

impl ArgMode {
    pub fn marker(&self) -> &'static str {
        match self {
            ArgMode::Bound => "+",
            ArgMode::Free => "-",
            ArgMode::Any => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Value,
    /// A single file reference; the blob is synchronised before the call.
    File,
    /// A list of file references.
    Files,
    /// A tool session handle.
    Handle,
}

impl ArgKind {
    fn parse(s: &str) -> Option<ArgKind> {
        match s {
            "value" => Some(ArgKind::Value),
            "file" => Some(ArgKind::File),
            "files" => Some(ArgKind::Files),
            "handle" => Some(ArgKind::Handle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::Value => "value",
            ArgKind::File => "file",
            ArgKind::Files => "files",
            ArgKind::Handle => "handle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub mode: ArgMode,
    pub name: String,
    pub kind: ArgKind,
}

impl ArgSpec {
    pub fn new(mode: ArgMode, name: impl Into<String>, kind: ArgKind) -> Self {
        ArgSpec {
            mode,
            name: name.into(),
            kind,
        }
    }

    /// Parse a comma-separated signature string such as
    /// `"+low:value, +up:value, -res:value"`.
    pub fn parse_signature(s: &str) -> Result<Vec<ArgSpec>, EtbError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        trimmed
            .split(',')
            .map(|part| {
                let part = part.trim();
                let (mode, rest) = match part.chars().next() {
                    Some('+') => (ArgMode::Bound, &part[1..]),
                    Some('-') => (ArgMode::Free, &part[1..]),
                    _ => (ArgMode::Any, part),
                };
                let (name, kind) = rest
                    .split_once(':')
                    .ok_or_else(|| EtbError::Signature(format!("missing ':kind' in {:?}", part)))?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(EtbError::Signature(format!("missing name in {:?}", part)));
                }
                let kind = ArgKind::parse(kind.trim())
                    .ok_or_else(|| EtbError::Signature(format!("unknown kind in {:?}", part)))?;
                Ok(ArgSpec::new(mode, name, kind))
            })
            .collect()
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", self.mode.marker(), self.name, self.kind.as_str())
    }
}

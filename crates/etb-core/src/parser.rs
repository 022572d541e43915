//! Goal and rule parser.
//!
//! A logos lexer feeds a recursive-descent parser with a depth guard.
//! Grammar (whitespace insignificant, `%` starts a line comment):
//!
//!   rules    → statement+
//!   statement→ literal "." | literal ":-" literals "."
//!   literals → literal ("," literal)*
//!   literal  → symbol "(" terms? ")"
//!   terms    → term ("," term)*
//!   term     → integer | string | "true" | "false" | symbol
//!            | symbol "(" terms? ")"                (nested compound)
//!            | "[" terms? "]"                       (list)
//!            | "{" pairs? "}"                       (map / file reference)
//!   pairs    → key ":" term ("," key ":" term)*
//!   key      → symbol | string
//!
//! Symbols starting with an uppercase letter or `_` are variables; a map
//! with exactly the keys `file` and `sha1` (string values) parses as a file
//! reference.

use crate::error::EtbError;
use crate::fileref::FileRef;
use crate::rules::Rule;
use crate::term::{is_var_name, Literal, Term};
use logos::Logos;
use std::collections::BTreeMap;
use std::ops::Range;

/// Recursion limit for nested terms.
const MAX_DEPTH: usize = 64;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"%[^\n]*")]
enum Tok {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Period,
    #[token(":-")]
    Turnstile,
    #[token(":")]
    Colon,
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),
    #[regex(r"'([^'\\]|\\.)*'", |lex| unescape(lex.slice()))]
    SingleStr(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Symbol(String),
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

struct Parser {
    tokens: Vec<(Tok, Range<usize>)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, EtbError> {
        let mut tokens = Vec::new();
        for (tok, span) in Tok::lexer(src).spanned() {
            match tok {
                Ok(t) => tokens.push((t, span)),
                Err(()) => {
                    return Err(EtbError::parse(
                        format!("unexpected character {:?}", &src[span.clone()]),
                        span.start,
                    ))
                }
            }
        }
        Ok(Parser {
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or_else(|| self.tokens.last().map(|(_, s)| s.end).unwrap_or(0))
    }

    fn error(&self, message: impl Into<String>) -> EtbError {
        EtbError::parse(message, self.offset())
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), EtbError> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            Some(t) => Err(self.error(format!("expected {}, found {:?}", what, t))),
            None => Err(self.error(format!("expected {}, found end of input", what))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn enter(&mut self) -> Result<(), EtbError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(self.error("maximum nesting depth exceeded"))
        } else {
            Ok(())
        }
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn literal(&mut self) -> Result<Literal, EtbError> {
        let sym = match self.next() {
            Some(Tok::Symbol(s)) => s,
            Some(t) => return Err(self.error(format!("expected a predicate symbol, found {:?}", t))),
            None => return Err(self.error("expected a predicate symbol, found end of input")),
        };
        if is_var_name(&sym) {
            return Err(self.error(format!("predicate symbol {} may not be a variable", sym)));
        }
        self.expect(Tok::LParen, "'('")?;
        let args = self.terms_until(Tok::RParen)?;
        Ok(Literal::new(sym, args))
    }

    fn terms_until(&mut self, close: Tok) -> Result<Vec<Term>, EtbError> {
        let mut out = Vec::new();
        if self.peek() == Some(&close) {
            self.next();
            return Ok(out);
        }
        loop {
            out.push(self.term()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(t) if t == close => return Ok(out),
                Some(t) => return Err(self.error(format!("expected ',' or close, found {:?}", t))),
                None => return Err(self.error("unterminated term list")),
            }
        }
    }

    fn term(&mut self) -> Result<Term, EtbError> {
        self.enter()?;
        let out = self.term_inner();
        self.leave();
        out
    }

    fn term_inner(&mut self) -> Result<Term, EtbError> {
        match self.next() {
            Some(Tok::Int(n)) => Ok(Term::Num(n)),
            Some(Tok::Str(s)) | Some(Tok::SingleStr(s)) => Ok(Term::Str(s)),
            Some(Tok::Symbol(s)) => {
                if self.peek() == Some(&Tok::LParen) {
                    if is_var_name(&s) {
                        return Err(
                            self.error(format!("compound symbol {} may not be a variable", s))
                        );
                    }
                    self.next();
                    let args = self.terms_until(Tok::RParen)?;
                    return Ok(Term::Compound(s, args));
                }
                match s.as_str() {
                    "true" => Ok(Term::Bool(true)),
                    "false" => Ok(Term::Bool(false)),
                    _ => Ok(Term::symbol(s)),
                }
            }
            Some(Tok::LBracket) => Ok(Term::List(self.terms_until(Tok::RBracket)?)),
            Some(Tok::LBrace) => self.map_body(),
            Some(t) => Err(self.error(format!("expected a term, found {:?}", t))),
            None => Err(self.error("expected a term, found end of input")),
        }
    }

    fn map_body(&mut self) -> Result<Term, EtbError> {
        let mut entries = BTreeMap::new();
        if self.peek() == Some(&Tok::RBrace) {
            self.next();
            return Ok(Term::Map(entries));
        }
        loop {
            let key = match self.next() {
                Some(Tok::Symbol(s)) => s,
                Some(Tok::Str(s)) | Some(Tok::SingleStr(s)) => s,
                Some(t) => return Err(self.error(format!("expected a map key, found {:?}", t))),
                None => return Err(self.error("unterminated map")),
            };
            self.expect(Tok::Colon, "':'")?;
            let value = self.term()?;
            entries.insert(key, value);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RBrace) => break,
                Some(t) => return Err(self.error(format!("expected ',' or '}}', found {:?}", t))),
                None => return Err(self.error("unterminated map")),
            }
        }
        // {file: "...", sha1: "..."} is a file reference
        if entries.len() == 2 {
            if let (Some(Term::Str(file)), Some(Term::Str(sha1))) =
                (entries.get("file"), entries.get("sha1"))
            {
                return Ok(Term::File(FileRef::new(file.clone(), sha1.clone())));
            }
        }
        Ok(Term::Map(entries))
    }

    fn statement(&mut self) -> Result<Rule, EtbError> {
        let head = self.literal()?;
        match self.next() {
            Some(Tok::Period) => Ok(Rule::fact(head)),
            Some(Tok::Turnstile) => {
                let mut body = vec![self.literal()?];
                loop {
                    match self.next() {
                        Some(Tok::Comma) => body.push(self.literal()?),
                        Some(Tok::Period) => return Ok(Rule::new(head, body)),
                        Some(t) => {
                            return Err(self.error(format!("expected ',' or '.', found {:?}", t)))
                        }
                        None => return Err(self.error("rule is missing its final '.'")),
                    }
                }
            }
            Some(t) => Err(self.error(format!("expected '.' or ':-', found {:?}", t))),
            None => Err(self.error("statement is missing its final '.'")),
        }
    }
}

/// Parse a single term.
pub fn parse_term(src: &str) -> Result<Term, EtbError> {
    let mut p = Parser::new(src)?;
    let t = p.term()?;
    if !p.at_end() {
        return Err(p.error("trailing input after term"));
    }
    Ok(t)
}

/// Parse a single literal; a trailing `.` is accepted and ignored, so both
/// goal strings and fact lines parse.
pub fn parse_literal(src: &str) -> Result<Literal, EtbError> {
    let mut p = Parser::new(src)?;
    let l = p.literal()?;
    if p.peek() == Some(&Tok::Period) {
        p.next();
    }
    if !p.at_end() {
        return Err(p.error("trailing input after literal"));
    }
    Ok(l)
}

/// Parse a single rule or fact statement.
pub fn parse_rule(src: &str) -> Result<Rule, EtbError> {
    let mut p = Parser::new(src)?;
    let r = p.statement()?;
    if !p.at_end() {
        return Err(p.error("trailing input after rule"));
    }
    Ok(r)
}

/// Parse a sequence of statements (a rule file).
pub fn parse_rules(src: &str) -> Result<Vec<Rule>, EtbError> {
    let mut p = Parser::new(src)?;
    let mut out = Vec::new();
    while !p.at_end() {
        out.push(p.statement()?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_goal() {
        let l = parse_literal("ancestor(bill, Y)").unwrap();
        assert_eq!(l.pred, "ancestor");
        assert_eq!(l.args, vec![Term::Id("bill".into()), Term::Var("Y".into())]);
    }

    #[test]
    fn test_parse_rule_file() {
        let src = "\
            % a tiny family tree\n\
            parent(bill, mary).\n\
            parent(mary, john).\n\
            ancestor(X, Y) :- parent(X, Y).\n\
            ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).\n";
        let rules = parse_rules(src).unwrap();
        assert_eq!(rules.len(), 4);
        assert!(rules[0].is_fact());
        assert_eq!(rules[3].body.len(), 2);
    }

    #[test]
    fn test_parse_term_kinds() {
        assert_eq!(parse_term("42").unwrap(), Term::Num(42));
        assert_eq!(parse_term("-7").unwrap(), Term::Num(-7));
        assert_eq!(parse_term("true").unwrap(), Term::Bool(true));
        assert_eq!(parse_term("\"a b\"").unwrap(), Term::Str("a b".into()));
        assert_eq!(parse_term("'a b'").unwrap(), Term::Str("a b".into()));
        assert_eq!(parse_term("X").unwrap(), Term::Var("X".into()));
        assert_eq!(parse_term("_tmp").unwrap(), Term::Var("_tmp".into()));
        assert_eq!(parse_term("bill").unwrap(), Term::Id("bill".into()));
        assert_eq!(
            parse_term("[1, 2]").unwrap(),
            Term::List(vec![Term::Num(1), Term::Num(2)])
        );
        assert_eq!(
            parse_term("f(a, X)").unwrap(),
            Term::Compound("f".into(), vec![Term::Id("a".into()), Term::Var("X".into())])
        );
    }

    #[test]
    fn test_parse_fileref() {
        let t = parse_term("{file: \"doc.adoc\", sha1: \"9af1\"}").unwrap();
        assert_eq!(t, Term::File(FileRef::new("doc.adoc", "9af1")));
        // other maps stay maps
        let m = parse_term("{k: v}").unwrap();
        assert!(matches!(m, Term::Map(_)));
    }

    #[test]
    fn test_parse_errors_are_synchronous() {
        assert!(parse_literal("ancestor(bill,").is_err());
        assert!(parse_literal("Ancestor(bill, Y)").is_err());
        assert!(parse_rules("p(a)").is_err()); // missing period
        assert!(parse_term("p(?)").is_err());
        match parse_literal("parent(bill mary)") {
            Err(EtbError::Parse { position, .. }) => assert!(position > 0),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_comments_and_whitespace() {
        let rules = parse_rules("p(a). % trailing comment\n% full line\nq(b).").unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_deep_nesting_is_guarded() {
        let mut src = String::new();
        for _ in 0..100 {
            src.push_str("f(");
        }
        src.push('a');
        for _ in 0..100 {
            src.push(')');
        }
        assert!(parse_term(&src).is_err());
    }
}

//! The term I/O boundary: s-expression reading, space-directed parsing,
//! and printing.
//!
//! Terms parse from a tagged tree form: each inner node is `(head child …)`
//! where `head` is a variant name of the expected space. Maps parse from
//! `{k v …}` dictionary literals, sets from `#{…}` literals, and addresses
//! from their serialized identifier under an egal address space. Printing
//! is the inverse; external values render their payload verbatim.

use std::{fmt, str::FromStr, sync::Arc};

use num_bigint::BigInt;

use crate::{
    error::{EngineError, EngineResult, Stage},
    space::{Alternative, Component, Language, Space},
    value::{AddrName, Address, Atom, DPattern, MapValue, SetValue, VariantValue},
};

/// A read but not yet space-checked tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    Number(BigInt),
    Bool(bool),
    Symbol(String),
    Char(char),
    Text(String),
    List(Vec<Sexp>),
    Dict(Vec<(Sexp, Sexp)>),
    Set(Vec<Sexp>),
}

/// Reads exactly one s-expression; trailing non-whitespace is an error.
pub fn read_sexp(input: &str) -> EngineResult<Sexp> {
    let mut reader = Reader::new(input);
    reader.skip_trivia();
    let sexp = reader.read_value()?;
    reader.skip_trivia();
    if reader.peek().is_some() {
        return Err(parse_error("trailing input after the first term"));
    }
    Ok(sexp)
}

/// Parses a term of the named space from source text.
pub fn parse_term(lang: &Language, space: &str, input: &str) -> EngineResult<DPattern> {
    let sexp = read_sexp(input)?;
    parse_in_space(lang, space, &sexp, &mut Vec::new())
}

/// Renders a term back to its source form.
pub fn print_term(d: &DPattern) -> String {
    d.to_string()
}

fn parse_error(message: impl Into<String>) -> EngineError {
    EngineError::new(Stage::Parse, message)
}

fn parse_in_space(lang: &Language, space_name: &str, sexp: &Sexp, seen: &mut Vec<Arc<str>>) -> EngineResult<DPattern> {
    if seen.iter().any(|n| &**n == space_name) {
        return Err(parse_error(format!("no alternative of space `{space_name}` accepts this form")));
    }
    match lang.space(space_name)? {
        Space::User { alternatives, .. } => {
            seen.push(Arc::from(space_name));
            let head = match sexp {
                Sexp::List(items) => match items.first() {
                    Some(Sexp::Symbol(h)) => Some(h.as_str()),
                    _ => None,
                },
                _ => None,
            };
            let mut last_err = None;
            for alt in alternatives {
                match alt {
                    Alternative::Variant(v) => {
                        if head == Some(&*v.name) {
                            let Sexp::List(items) = sexp else { unreachable!("head implies a list") };
                            seen.pop();
                            return parse_variant(lang, v, items);
                        }
                    }
                    Alternative::SpaceRef(name) => match parse_in_space(lang, name, sexp, seen) {
                        Ok(d) => {
                            seen.pop();
                            return Ok(d);
                        }
                        Err(e) => last_err = Some(e),
                    },
                    Alternative::Component(comp) => match parse_component(lang, comp, sexp) {
                        Ok(d) => {
                            seen.pop();
                            return Ok(d);
                        }
                        Err(e) => last_err = Some(e),
                    },
                }
            }
            seen.pop();
            if let Some(h) = head {
                return Err(parse_error(format!("unknown variant head `{h}` in space `{space_name}`")));
            }
            Err(last_err.unwrap_or_else(|| {
                parse_error(format!("no alternative of space `{space_name}` accepts this form"))
            }))
        }
        Space::Address { tag } => parse_address(tag, sexp),
        Space::External(ext) => {
            let d = parse_raw(lang, sexp)?;
            if (ext.contains)(&d) || matches!(&d, DPattern::External(e) if e.space == ext.name) {
                Ok(d)
            } else {
                Err(EngineError::with_value(
                    Stage::Parse,
                    format!("value is not a member of external space `{name}`", name = ext.name),
                    d,
                ))
            }
        }
    }
}

fn parse_variant(lang: &Language, variant: &Arc<crate::space::Variant>, items: &[Sexp]) -> EngineResult<DPattern> {
    let children = &items[1..];
    if children.len() != variant.arity() {
        return Err(parse_error(format!(
            "variant `{name}` expects {arity} children, got {got}",
            name = variant.name,
            arity = variant.arity(),
            got = children.len(),
        )));
    }
    let mut realized = Vec::with_capacity(children.len());
    for (comp, child) in variant.components.iter().zip(children) {
        realized.push(parse_component(lang, comp, child)?);
    }
    Ok(DPattern::Variant(Box::new(VariantValue::new(variant.clone(), realized))))
}

fn parse_component(lang: &Language, comp: &Component, sexp: &Sexp) -> EngineResult<DPattern> {
    match comp {
        Component::Space(name) => parse_in_space(lang, name, sexp, &mut Vec::new()),
        Component::Address(tag) => parse_address(tag, sexp),
        Component::Map { domain, range, .. } | Component::QualifiedMap { domain, range, .. } => {
            let Sexp::Dict(pairs) = sexp else {
                return Err(parse_error("expected a map literal"));
            };
            let kind = comp
                .map_kind()
                .unwrap_or_else(|| unreachable!("map components always classify"));
            let mut m = MapValue::new(kind);
            for (k, v) in pairs {
                m.entries
                    .insert(parse_component(lang, domain, k)?, parse_component(lang, range, v)?);
            }
            Ok(DPattern::Map(m))
        }
        Component::SetOf(inner) => {
            let Sexp::Set(elems) = sexp else {
                return Err(parse_error("expected a set literal"));
            };
            let mut s = SetValue::new();
            for e in elems {
                s.elems.insert(parse_component(lang, inner, e)?);
            }
            Ok(DPattern::Set(s))
        }
        Component::Anything => parse_raw(lang, sexp),
    }
}

/// A serialized identifier under an egal address space: `@N` is a fresh
/// identifier, any other symbol or number is a named one.
fn parse_address(tag: &Arc<str>, sexp: &Sexp) -> EngineResult<DPattern> {
    let name = match sexp {
        Sexp::Symbol(s) => match s.strip_prefix('@') {
            Some(digits) => match digits.parse::<u64>() {
                Ok(n) => AddrName::Fresh(n),
                Err(_) => AddrName::Named(Arc::from(s.as_str())),
            },
            None => AddrName::Named(Arc::from(s.as_str())),
        },
        Sexp::Number(n) => AddrName::Named(Arc::from(n.to_string().as_str())),
        _ => return Err(parse_error(format!("expected an address identifier for tag `{tag}`"))),
    };
    Ok(DPattern::Addr(Address::egal(tag.clone(), name)))
}

/// Component-free parsing: atoms become atoms, lists become variants via
/// the language's interned descriptor registry, dictionaries become
/// discrete maps, set literals become sets.
fn parse_raw(lang: &Language, sexp: &Sexp) -> EngineResult<DPattern> {
    match sexp {
        Sexp::Number(n) => Ok(DPattern::Atom(Atom::Number(n.clone()))),
        Sexp::Bool(b) => Ok(DPattern::Atom(Atom::Bool(*b))),
        Sexp::Symbol(s) => Ok(DPattern::symbol(s.as_str())),
        Sexp::Char(c) => Ok(DPattern::Atom(Atom::Char(*c))),
        Sexp::Text(s) => Ok(DPattern::text(s.clone())),
        Sexp::List(items) => {
            let Some(Sexp::Symbol(head)) = items.first() else {
                return Err(parse_error("expected a variant head symbol"));
            };
            let Some(variant) = lang.variant(head) else {
                return Err(parse_error(format!("unknown variant head `{head}`")));
            };
            parse_variant(lang, &variant.clone(), items)
        }
        Sexp::Dict(pairs) => {
            let mut m = MapValue::new(crate::value::MapKind::Discrete);
            for (k, v) in pairs {
                m.entries.insert(parse_raw(lang, k)?, parse_raw(lang, v)?);
            }
            Ok(DPattern::Map(m))
        }
        Sexp::Set(elems) => {
            let mut s = SetValue::new();
            for e in elems {
                s.elems.insert(parse_raw(lang, e)?);
            }
            Ok(DPattern::Set(s))
        }
    }
}

/// Writes a term in its source form. `Display for DPattern` delegates here.
pub(crate) fn write_term(f: &mut fmt::Formatter<'_>, d: &DPattern) -> fmt::Result {
    match d {
        DPattern::Atom(a) => write!(f, "{a}"),
        DPattern::Variant(v) => {
            write!(f, "({name}", name = v.variant.name)?;
            for child in &v.children {
                write!(f, " ")?;
                write_term(f, child)?;
            }
            write!(f, ")")
        }
        DPattern::Map(m) => {
            write!(f, "{{")?;
            for (i, (k, v)) in m.entries.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_term(f, k)?;
                write!(f, " ")?;
                write_term(f, v)?;
            }
            write!(f, "}}")
        }
        DPattern::Set(s) => {
            write!(f, "#{{")?;
            for (i, e) in s.elems.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_term(f, e)?;
            }
            write!(f, "}}")
        }
        DPattern::Addr(a) => write!(f, "{a}"),
        // External payloads render verbatim.
        DPattern::External(e) => write_term(f, &e.payload),
    }
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    /// Skips whitespace and `;` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn read_value(&mut self) -> EngineResult<Sexp> {
        self.skip_trivia();
        match self.peek() {
            None => Err(parse_error("unexpected end of input")),
            Some('(') => {
                self.pos += 1;
                let items = self.read_until(')')?;
                Ok(Sexp::List(items))
            }
            Some('{') => {
                self.pos += 1;
                let items = self.read_until('}')?;
                if items.len() % 2 != 0 {
                    return Err(parse_error("map literal has an odd number of elements"));
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut it = items.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    pairs.push((k, v));
                }
                Ok(Sexp::Dict(pairs))
            }
            Some(')') | Some('}') => Err(parse_error("unbalanced closing delimiter")),
            Some('"') => self.read_string(),
            Some('#') => self.read_hash(),
            Some(_) => self.read_atom(),
        }
    }

    fn read_until(&mut self, close: char) -> EngineResult<Vec<Sexp>> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(parse_error(format!("unterminated `{close}` form"))),
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.read_value()?),
            }
        }
    }

    fn read_string(&mut self) -> EngineResult<Sexp> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(parse_error("unterminated string literal")),
                Some('"') => return Ok(Sexp::Text(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('\'') => out.push('\''),
                    Some('u') => out.push(self.read_unicode_escape()?),
                    _ => return Err(parse_error("unknown string escape")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_unicode_escape(&mut self) -> EngineResult<char> {
        if self.bump() != Some('{') {
            return Err(parse_error("malformed unicode escape"));
        }
        let mut hex = String::new();
        loop {
            match self.bump() {
                Some('}') => break,
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(parse_error("malformed unicode escape")),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| parse_error("invalid unicode escape"))
    }

    fn read_hash(&mut self) -> EngineResult<Sexp> {
        self.pos += 1; // the `#`
        match self.bump() {
            Some('t') => Ok(Sexp::Bool(true)),
            Some('f') => Ok(Sexp::Bool(false)),
            Some('{') => {
                let items = self.read_until('}')?;
                Ok(Sexp::Set(items))
            }
            Some('\\') => self.read_char(),
            _ => Err(parse_error("unknown `#` form")),
        }
    }

    fn read_char(&mut self) -> EngineResult<Sexp> {
        let Some(first) = self.bump() else {
            return Err(parse_error("unterminated character literal"));
        };
        if first.is_alphabetic() && self.peek().is_some_and(char::is_alphanumeric) {
            let mut name = String::from(first);
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() {
                    name.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
            match name.as_str() {
                "space" => Ok(Sexp::Char(' ')),
                "newline" => Ok(Sexp::Char('\n')),
                "tab" => Ok(Sexp::Char('\t')),
                "return" => Ok(Sexp::Char('\r')),
                "null" => Ok(Sexp::Char('\0')),
                _ => Err(parse_error(format!("unknown character name `{name}`"))),
            }
        } else {
            Ok(Sexp::Char(first))
        }
    }

    fn read_atom(&mut self) -> EngineResult<Sexp> {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '{' | '}' | '"' | ';') {
                break;
            }
            token.push(c);
            self.pos += 1;
        }
        if token.is_empty() {
            return Err(parse_error("expected an atom"));
        }
        if let Ok(n) = BigInt::from_str(&token) {
            return Ok(Sexp::Number(n));
        }
        Ok(Sexp::Symbol(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{Alternative, Component, ExternalSpace, Space, Variant};

    fn lang() -> Language {
        let var = Variant::new("Var", [Component::space("X")]);
        let lam = Variant::new("Lam", [Component::space("X"), Component::space("E")]);
        let app = Variant::new("App", [Component::space("E"), Component::space("E")]);
        Language::new(
            "lambda",
            [
                (
                    Arc::from("E"),
                    Space::user_trusted([
                        Alternative::Variant(app),
                        Alternative::Variant(lam),
                        Alternative::Variant(var),
                    ]),
                ),
                (
                    Arc::from("X"),
                    Space::External(ExternalSpace::precise("X", |d| {
                        matches!(d, DPattern::Atom(Atom::Symbol(_)))
                    })),
                ),
                (Arc::from("Heap"), Space::address("A")),
            ],
        )
        .unwrap()
    }

    /// Reader handles nesting, booleans, chars, strings, dicts, and sets.
    #[test]
    fn reader_basics() {
        assert_eq!(read_sexp("42").unwrap(), Sexp::Number(BigInt::from(42)));
        assert_eq!(read_sexp("#t").unwrap(), Sexp::Bool(true));
        assert_eq!(read_sexp("#\\a").unwrap(), Sexp::Char('a'));
        assert_eq!(read_sexp("#\\space").unwrap(), Sexp::Char(' '));
        assert_eq!(read_sexp("\"a\\nb\"").unwrap(), Sexp::Text("a\nb".into()));
        assert_eq!(
            read_sexp("(f x 1)").unwrap(),
            Sexp::List(vec![
                Sexp::Symbol("f".into()),
                Sexp::Symbol("x".into()),
                Sexp::Number(BigInt::from(1)),
            ])
        );
        assert_eq!(
            read_sexp("{x 1}").unwrap(),
            Sexp::Dict(vec![(Sexp::Symbol("x".into()), Sexp::Number(BigInt::from(1)))])
        );
        assert_eq!(
            read_sexp("#{1 2}").unwrap(),
            Sexp::Set(vec![Sexp::Number(BigInt::from(1)), Sexp::Number(BigInt::from(2))])
        );
    }

    /// Comments and trailing-input detection.
    #[test]
    fn reader_trivia_and_trailing() {
        assert_eq!(read_sexp("; c\n 7 ; d").unwrap(), Sexp::Number(BigInt::from(7)));
        assert!(read_sexp("1 2").is_err(), "two terms should be rejected");
        assert!(read_sexp(")").is_err());
        assert!(read_sexp("{x}").is_err(), "odd map literal should be rejected");
    }

    /// Space-directed parsing builds variant values with interned
    /// descriptors.
    #[test]
    fn parse_tagged_tree() {
        let lang = lang();
        let term = parse_term(&lang, "E", "(App (Lam a (Var a)) (Var b))").unwrap();
        assert!(lang.in_space("E", &term).unwrap());
        assert_eq!(print_term(&term), "(App (Lam a (Var a)) (Var b))");
    }

    /// Unknown heads, arity mismatches, and component type mismatches are
    /// parse errors.
    #[test]
    fn parse_errors() {
        let lang = lang();
        let err = parse_term(&lang, "E", "(Mystery x)").unwrap_err();
        assert_eq!(err.stage, Stage::Parse);
        assert!(err.message.contains("Mystery"), "message should name the head: {err}");

        let err = parse_term(&lang, "E", "(Var a b)").unwrap_err();
        assert_eq!(err.stage, Stage::Parse);

        let err = parse_term(&lang, "E", "(Var 3)").unwrap_err();
        assert_eq!(err.stage, Stage::Parse);
    }

    /// Parsing against an undefined space is a hard error.
    #[test]
    fn parse_unexpected_space() {
        let lang = lang();
        let err = parse_term(&lang, "Nope", "(Var a)").unwrap_err();
        assert_eq!(err.stage, Stage::InSpace);
    }

    /// Addresses parse from serialized identifiers under an egal address
    /// space and print back to the same identifier.
    #[test]
    fn parse_addresses() {
        let lang = lang();
        let d = parse_term(&lang, "Heap", "@3").unwrap();
        let DPattern::Addr(a) = &d else { panic!("expected an address, got {d}") };
        assert_eq!(a.name, AddrName::Fresh(3));
        assert_eq!(print_term(&d), "@3");

        let d = parse_term(&lang, "Heap", "loop-head").unwrap();
        let DPattern::Addr(a) = &d else { panic!("expected an address, got {d}") };
        assert_eq!(a.name, AddrName::Named(Arc::from("loop-head")));
        assert_eq!(print_term(&d), "loop-head");
    }

    /// Round-trip for a term with nested maps and sets.
    #[test]
    fn roundtrip_map_and_set() {
        let lang = lang();
        let d = DPattern::Map(MapValue::discrete([(
            DPattern::symbol("x"),
            DPattern::Set(SetValue::from_elems([DPattern::number(1), DPattern::number(2)])),
        )]));
        let printed = print_term(&d);
        let comp = Component::map(Component::Anything, Component::set_of(Component::Anything));
        let reparsed = parse_component(&lang, &comp, &read_sexp(&printed).unwrap()).unwrap();
        assert_eq!(reparsed, d, "print→parse should reproduce the value: {printed}");
    }
}

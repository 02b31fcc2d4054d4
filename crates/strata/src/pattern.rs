//! Patterns, environments, and the concrete and abstract matchers.
//!
//! Matching unifies a [`Pattern`] against a [`DPattern`] under an
//! environment and a store. The concrete matcher is deterministic: `fail`
//! or exactly one extended environment. The abstract matcher returns a set
//! of environments tagged with a [`Quality`]; the whole match collapses to
//! `May` at the first non-must step.
//!
//! Match failure is silent. Errors mean the pattern itself is broken
//! (unbound reference, arity mismatch against the interned descriptor).
//!
//! Structural-address policy: a structural address matched by any
//! non-binder pattern is dereferenced through the store and the pattern is
//! matched against the stored value (fanning out over the join set in
//! abstract mode). An egal address never dereferences; it only
//! equal-matches another egal address with identical tag and identifier.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    error::{EngineError, EngineResult, Stage},
    space::{Language, Space, Ternary, Variant},
    store::{Cardinality, Counts, Store},
    value::{AddrKind, Address, Atom, DPattern, MapKind, VariantValue},
};

/// Abstract-mode tag on a result: does it follow definitely or possibly?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Quality {
    Must,
    May,
}

impl Quality {
    /// `Must` only if both sides are `Must`.
    pub fn meet(self, other: Self) -> Self {
        if self == Self::Must && other == Self::Must {
            Self::Must
        } else {
            Self::May
        }
    }
}

/// Quantifier annotation on a meta-function argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Quantifier {
    /// Every denotation behind the address must match.
    All,
    /// At least one denotation must match.
    Exists,
}

/// A matching form.
///
/// `set-with` / `map-with` destructuring is declared upstream but has no
/// specified semantics yet; when it lands it becomes new variants here and
/// new arms in both matchers.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Binds `name` if unbound (optionally after a membership check),
    /// otherwise requires the existing binding to equal the matched value.
    Bind {
        name: Arc<str>,
        space: Option<Arc<str>>,
    },
    /// Looks `name` up and equal-matches, with no space check. Unbound
    /// references are a structural error.
    Ref(Arc<str>),
    /// Matches a variant value with the same descriptor name, then matches
    /// children pairwise.
    Variant {
        variant: Arc<Variant>,
        children: Box<[Pattern]>,
    },
    /// Equal-matches the atom.
    Atom(Atom),
    /// Quantifies over the denotations behind a structural address
    /// (abstract mode only; concrete mode is transparent).
    Quantified {
        quantifier: Quantifier,
        inner: Box<Pattern>,
    },
}

impl Pattern {
    pub fn bind(name: impl Into<Arc<str>>) -> Self {
        Self::Bind {
            name: name.into(),
            space: None,
        }
    }

    pub fn bind_in(name: impl Into<Arc<str>>, space: impl Into<Arc<str>>) -> Self {
        Self::Bind {
            name: name.into(),
            space: Some(space.into()),
        }
    }

    pub fn reference(name: impl Into<Arc<str>>) -> Self {
        Self::Ref(name.into())
    }

    pub fn variant(variant: Arc<Variant>, children: impl IntoIterator<Item = Self>) -> Self {
        Self::Variant {
            variant,
            children: children.into_iter().collect(),
        }
    }

    pub fn number(n: i64) -> Self {
        Self::Atom(Atom::Number(n.into()))
    }

    pub fn symbol(s: impl Into<Arc<str>>) -> Self {
        Self::Atom(Atom::Symbol(s.into()))
    }

    /// Instantiates this pattern against an environment, producing a term.
    ///
    /// Used for rule right-hand sides and `Term` expressions. Unbound
    /// variables and arity mismatches are structural errors.
    pub fn instantiate(&self, env: &Env) -> EngineResult<DPattern> {
        match self {
            Self::Bind { name, .. } | Self::Ref(name) => env.get(name).cloned().ok_or_else(|| {
                EngineError::new(
                    Stage::ExprEval,
                    format!("unbound pattern variable `{name}` at instantiation"),
                )
            }),
            Self::Atom(a) => Ok(DPattern::Atom(a.clone())),
            Self::Variant { variant, children } => {
                if children.len() != variant.arity() {
                    return Err(EngineError::new(
                        Stage::ExprEval,
                        format!(
                            "variant `{name}` instantiated with {got} children, arity is {arity}",
                            name = variant.name,
                            got = children.len(),
                            arity = variant.arity(),
                        ),
                    ));
                }
                let realized: Vec<DPattern> = children
                    .iter()
                    .map(|c| c.instantiate(env))
                    .collect::<EngineResult<_>>()?;
                Ok(DPattern::Variant(Box::new(VariantValue::new(variant.clone(), realized))))
            }
            Self::Quantified { inner, .. } => inner.instantiate(env),
        }
    }
}

/// Finite mapping from pattern-variable name to DPattern. Persistent:
/// extension clones, so sibling branches never observe each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Env {
    bindings: AHashMap<Arc<str>, DPattern>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&DPattern> {
        self.bindings.get(name)
    }

    /// A new environment extended with one binding.
    pub fn bind(&self, name: Arc<str>, value: DPattern) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.insert(name, value);
        Self { bindings }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Deterministic concrete match: `None` is failure, `Some(env)` the single
/// extended environment.
pub fn match_concrete(
    lang: &Language,
    pat: &Pattern,
    d: &DPattern,
    env: &Env,
    store: &Store,
) -> EngineResult<Option<Env>> {
    // Structural addresses are transparent to non-binder patterns.
    if let DPattern::Addr(a) = d {
        if a.kind == AddrKind::Structural && !matches!(pat, Pattern::Bind { .. } | Pattern::Ref(_)) {
            let stored = store.lookup_one(a)?.clone();
            return match_concrete(lang, pat, &stored, env, store);
        }
    }
    match pat {
        Pattern::Bind { name, space } => {
            if let Some(existing) = env.get(name) {
                return Ok(if values_equal(lang, existing, d, store)? {
                    Some(env.clone())
                } else {
                    None
                });
            }
            if let Some(space_name) = space {
                if !lang.in_space(space_name, d)? {
                    return Ok(None);
                }
            }
            Ok(Some(env.bind(name.clone(), d.clone())))
        }
        Pattern::Ref(name) => {
            let bound = env.get(name).ok_or_else(|| {
                EngineError::new(Stage::Match, format!("reference to unbound variable `{name}`"))
            })?;
            Ok(if values_equal(lang, bound, d, store)? {
                Some(env.clone())
            } else {
                None
            })
        }
        Pattern::Variant { variant, children } => {
            if children.len() != variant.arity() {
                return Err(EngineError::new(
                    Stage::Match,
                    format!(
                        "pattern for variant `{name}` has {got} children, arity is {arity}",
                        name = variant.name,
                        got = children.len(),
                        arity = variant.arity(),
                    ),
                ));
            }
            let DPattern::Variant(vv) = d else {
                return Ok(None);
            };
            if vv.variant.name != variant.name {
                return Ok(None);
            }
            let mut current = env.clone();
            for (child_pat, child) in children.iter().zip(&vv.children) {
                match match_concrete(lang, child_pat, child, &current, store)? {
                    Some(next) => current = next,
                    None => return Ok(None),
                }
            }
            Ok(Some(current))
        }
        Pattern::Atom(a) => {
            let lhs = DPattern::Atom(a.clone());
            Ok(if values_equal(lang, &lhs, d, store)? {
                Some(env.clone())
            } else {
                None
            })
        }
        // Concrete mode ignores quantifiers.
        Pattern::Quantified { inner, .. } => match_concrete(lang, inner, d, env, store),
    }
}

/// Abstract match: a set of extended environments, each with a quality.
pub fn match_abstract(
    lang: &Language,
    pat: &Pattern,
    d: &DPattern,
    env: &Env,
    store: &Store,
    counts: &Counts,
) -> EngineResult<Vec<(Env, Quality)>> {
    if let DPattern::Addr(a) = d {
        let transparent = a.kind == AddrKind::Structural
            && !matches!(pat, Pattern::Bind { .. } | Pattern::Ref(_) | Pattern::Quantified { .. });
        if transparent {
            return fan_out_deref(lang, pat, a, env, store, counts);
        }
    }
    match pat {
        Pattern::Bind { name, space } => {
            if let Some(existing) = env.get(name) {
                return Ok(match values_equal_abs(lang, existing, d, store, counts)? {
                    Ternary::MustTrue => vec![(env.clone(), Quality::Must)],
                    Ternary::May => vec![(env.clone(), Quality::May)],
                    Ternary::MustFalse => vec![],
                });
            }
            if let Some(space_name) = space {
                if !lang.in_space(space_name, d)? {
                    return Ok(vec![]);
                }
            }
            Ok(vec![(env.bind(name.clone(), d.clone()), Quality::Must)])
        }
        Pattern::Ref(name) => {
            let bound = env.get(name).ok_or_else(|| {
                EngineError::new(Stage::Match, format!("reference to unbound variable `{name}`"))
            })?;
            Ok(match values_equal_abs(lang, bound, d, store, counts)? {
                Ternary::MustTrue => vec![(env.clone(), Quality::Must)],
                Ternary::May => vec![(env.clone(), Quality::May)],
                Ternary::MustFalse => vec![],
            })
        }
        Pattern::Variant { variant, children } => {
            if children.len() != variant.arity() {
                return Err(EngineError::new(
                    Stage::Match,
                    format!(
                        "pattern for variant `{name}` has {got} children, arity is {arity}",
                        name = variant.name,
                        got = children.len(),
                        arity = variant.arity(),
                    ),
                ));
            }
            let DPattern::Variant(vv) = d else {
                return Ok(vec![]);
            };
            if vv.variant.name != variant.name {
                return Ok(vec![]);
            }
            let mut frontier: Vec<(Env, Quality)> = vec![(env.clone(), Quality::Must)];
            for (child_pat, child) in children.iter().zip(&vv.children) {
                let mut next = Vec::new();
                for (e, q) in &frontier {
                    for (e2, q2) in match_abstract(lang, child_pat, child, e, store, counts)? {
                        push_env(&mut next, e2, q.meet(q2));
                    }
                }
                if next.is_empty() {
                    return Ok(vec![]);
                }
                frontier = next;
            }
            Ok(frontier)
        }
        Pattern::Atom(a) => {
            let lhs = DPattern::Atom(a.clone());
            Ok(match values_equal_abs(lang, &lhs, d, store, counts)? {
                Ternary::MustTrue => vec![(env.clone(), Quality::Must)],
                Ternary::May => vec![(env.clone(), Quality::May)],
                Ternary::MustFalse => vec![],
            })
        }
        Pattern::Quantified { quantifier, inner } => {
            let DPattern::Addr(a) = d else {
                // No denotation set to quantify over.
                return match_abstract(lang, inner, d, env, store, counts);
            };
            if a.kind == AddrKind::Egal {
                return match_abstract(lang, inner, d, env, store, counts);
            }
            let entry = store.lookup(a)?.clone();
            let spread = entry.len() > 1 || counts.get(a) == Cardinality::Many;
            let base = if spread { Quality::May } else { Quality::Must };
            let mut out: Vec<(Env, Quality)> = Vec::new();
            match quantifier {
                Quantifier::All => {
                    for v in &entry {
                        let results = match_abstract(lang, inner, v, env, store, counts)?;
                        if results.is_empty() {
                            return Ok(vec![]);
                        }
                        for (e, q) in results {
                            push_env(&mut out, e, base.meet(q));
                        }
                    }
                }
                Quantifier::Exists => {
                    for v in &entry {
                        for (e, q) in match_abstract(lang, inner, v, env, store, counts)? {
                            push_env(&mut out, e, base.meet(q));
                        }
                    }
                }
            }
            Ok(out)
        }
    }
}

/// Matches `pat` against every denotation behind a structural address.
fn fan_out_deref(
    lang: &Language,
    pat: &Pattern,
    addr: &Address,
    env: &Env,
    store: &Store,
    counts: &Counts,
) -> EngineResult<Vec<(Env, Quality)>> {
    let entry = store.lookup(addr)?.clone();
    let spread = entry.len() > 1 || counts.get(addr) == Cardinality::Many;
    let base = if spread { Quality::May } else { Quality::Must };
    let mut out = Vec::new();
    for v in &entry {
        for (e, q) in match_abstract(lang, pat, v, env, store, counts)? {
            push_env(&mut out, e, base.meet(q));
        }
    }
    Ok(out)
}

/// Set-semantics insert: an environment already present keeps its best
/// (must-preferred) quality instead of duplicating.
fn push_env(out: &mut Vec<(Env, Quality)>, env: Env, quality: Quality) {
    for (existing, q) in out.iter_mut() {
        if *existing == env {
            if quality == Quality::Must {
                *q = Quality::Must;
            }
            return;
        }
    }
    out.push((env, quality));
}

/// Store-aware structural equality, concrete mode.
///
/// Structural addresses are dereferenced on either side; egal addresses
/// compare purely by (tag, identifier). Map and set containment tries the
/// exact-hash fast path first, then falls back to a linear scan under this
/// same equality.
pub fn values_equal(lang: &Language, a: &DPattern, b: &DPattern, store: &Store) -> EngineResult<bool> {
    match (a, b) {
        (DPattern::Addr(x), DPattern::Addr(y)) if x.kind == AddrKind::Egal && y.kind == AddrKind::Egal => {
            Ok(x.space == y.space && x.name == y.name)
        }
        (DPattern::Addr(x), _) if x.kind == AddrKind::Structural => {
            let stored = store.lookup_one(x)?.clone();
            values_equal(lang, &stored, b, store)
        }
        (_, DPattern::Addr(y)) if y.kind == AddrKind::Structural => {
            let stored = store.lookup_one(y)?.clone();
            values_equal(lang, a, &stored, store)
        }
        // An egal address only equals another egal address.
        (DPattern::Addr(_), _) | (_, DPattern::Addr(_)) => Ok(false),
        (DPattern::Atom(x), DPattern::Atom(y)) => Ok(x == y),
        (DPattern::Variant(x), DPattern::Variant(y)) => {
            if x.variant.name != y.variant.name || x.children.len() != y.children.len() {
                return Ok(false);
            }
            for (cx, cy) in x.children.iter().zip(&y.children) {
                if !values_equal(lang, cx, cy, store)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (DPattern::Map(x), DPattern::Map(y)) => {
            if x.entries.len() != y.entries.len() {
                return Ok(false);
            }
            for (k, v) in &x.entries {
                let matched = match y.entries.get(k) {
                    Some(w) => values_equal(lang, v, w, store)?,
                    None => {
                        let mut found = false;
                        for (k2, w) in &y.entries {
                            if values_equal(lang, k, k2, store)? && values_equal(lang, v, w, store)? {
                                found = true;
                                break;
                            }
                        }
                        found
                    }
                };
                if !matched {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (DPattern::Set(x), DPattern::Set(y)) => {
            if x.elems.len() != y.elems.len() {
                return Ok(false);
            }
            for e in &x.elems {
                if y.elems.contains(e) {
                    continue;
                }
                let mut found = false;
                for f in &y.elems {
                    if values_equal(lang, e, f, store)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (DPattern::External(x), DPattern::External(y)) => {
            if let Some(oracle) = special_equal(lang, &x.space) {
                match oracle(a, b) {
                    Ternary::MustTrue => return Ok(true),
                    Ternary::MustFalse => return Ok(false),
                    // Concrete mode falls back to structural payloads.
                    Ternary::May => {}
                }
            }
            if x.space != y.space {
                return Ok(false);
            }
            values_equal(lang, &x.payload, &y.payload, store)
        }
        _ => Ok(false),
    }
}

/// Count-aware equality for abstract mode.
pub fn values_equal_abs(
    lang: &Language,
    a: &DPattern,
    b: &DPattern,
    store: &Store,
    counts: &Counts,
) -> EngineResult<Ternary> {
    match (a, b) {
        (DPattern::Addr(x), DPattern::Addr(y)) if x.kind == AddrKind::Egal && y.kind == AddrKind::Egal => {
            if x.space == y.space && x.name == y.name {
                // A saturated abstract address stands for several concrete
                // cells, so even a self-comparison is only possible.
                Ok(if counts.get(x) == Cardinality::Many {
                    Ternary::May
                } else {
                    Ternary::MustTrue
                })
            } else {
                Ok(Ternary::MustFalse)
            }
        }
        (DPattern::Addr(x), _) if x.kind == AddrKind::Structural => deref_equal_abs(lang, x, b, store, counts),
        (_, DPattern::Addr(y)) if y.kind == AddrKind::Structural => deref_equal_abs(lang, y, a, store, counts),
        (DPattern::Addr(_), _) | (_, DPattern::Addr(_)) => Ok(Ternary::MustFalse),
        (DPattern::Atom(x), DPattern::Atom(y)) => Ok(Ternary::from_bool(x == y)),
        (DPattern::Variant(x), DPattern::Variant(y)) => {
            if x.variant.name != y.variant.name || x.children.len() != y.children.len() {
                return Ok(Ternary::MustFalse);
            }
            let mut acc = Ternary::MustTrue;
            for (cx, cy) in x.children.iter().zip(&y.children) {
                acc = acc.and(values_equal_abs(lang, cx, cy, store, counts)?);
                if acc == Ternary::MustFalse {
                    return Ok(Ternary::MustFalse);
                }
            }
            Ok(acc)
        }
        (DPattern::Map(x), DPattern::Map(y)) => {
            if x.kind == MapKind::Abstract || y.kind == MapKind::Abstract {
                // Abstract domains may pair keys in multiple compatible
                // ways and entries may be only may-present; stay
                // conservative unless both maps are empty.
                return Ok(if x.entries.is_empty() && y.entries.is_empty() {
                    Ternary::MustTrue
                } else {
                    Ternary::May
                });
            }
            if x.entries.len() != y.entries.len() {
                return Ok(Ternary::MustFalse);
            }
            let mut acc = Ternary::MustTrue;
            for (k, v) in &x.entries {
                let t = match y.entries.get(k) {
                    Some(w) => values_equal_abs(lang, v, w, store, counts)?,
                    None => scan_equal_abs(lang, k, v, y, store, counts)?,
                };
                acc = acc.and(t);
                if acc == Ternary::MustFalse {
                    return Ok(Ternary::MustFalse);
                }
            }
            Ok(acc)
        }
        (DPattern::Set(x), DPattern::Set(y)) => {
            if x.elems.len() != y.elems.len() {
                return Ok(Ternary::MustFalse);
            }
            let mut acc = Ternary::MustTrue;
            for e in &x.elems {
                if y.elems.contains(e) {
                    continue;
                }
                let mut best = Ternary::MustFalse;
                for f in &y.elems {
                    match values_equal_abs(lang, e, f, store, counts)? {
                        Ternary::MustTrue => {
                            best = Ternary::MustTrue;
                            break;
                        }
                        Ternary::May => best = Ternary::May,
                        Ternary::MustFalse => {}
                    }
                }
                acc = acc.and(best);
                if acc == Ternary::MustFalse {
                    return Ok(Ternary::MustFalse);
                }
            }
            Ok(acc)
        }
        (DPattern::External(x), DPattern::External(y)) => {
            if let Some(oracle) = special_equal(lang, &x.space) {
                return Ok(oracle(a, b));
            }
            if x.space != y.space {
                return Ok(Ternary::MustFalse);
            }
            values_equal_abs(lang, &x.payload, &y.payload, store, counts)
        }
        _ => Ok(Ternary::MustFalse),
    }
}

/// Ternary equality of `other` against every denotation behind `addr`.
fn deref_equal_abs(
    lang: &Language,
    addr: &Address,
    other: &DPattern,
    store: &Store,
    counts: &Counts,
) -> EngineResult<Ternary> {
    let entry = store.lookup(addr)?.clone();
    let spread = entry.len() > 1 || counts.get(addr) == Cardinality::Many;
    let mut any_possible = false;
    let mut all_must = true;
    for v in &entry {
        match values_equal_abs(lang, v, other, store, counts)? {
            Ternary::MustTrue => any_possible = true,
            Ternary::May => {
                any_possible = true;
                all_must = false;
            }
            Ternary::MustFalse => all_must = false,
        }
    }
    Ok(if !any_possible {
        Ternary::MustFalse
    } else if all_must && !spread {
        Ternary::MustTrue
    } else {
        Ternary::May
    })
}

/// Linear-scan fallback for a discrete map whose exact lookup missed.
fn scan_equal_abs(
    lang: &Language,
    key: &DPattern,
    value: &DPattern,
    map: &crate::value::MapValue,
    store: &Store,
    counts: &Counts,
) -> EngineResult<Ternary> {
    let mut best = Ternary::MustFalse;
    for (k, w) in &map.entries {
        let t = values_equal_abs(lang, key, k, store, counts)?
            .and(values_equal_abs(lang, value, w, store, counts)?);
        match t {
            Ternary::MustTrue => return Ok(Ternary::MustTrue),
            Ternary::May => best = Ternary::May,
            Ternary::MustFalse => {}
        }
    }
    Ok(best)
}

/// The special-equality oracle of a named external space, if one exists.
fn special_equal(
    lang: &Language,
    space_name: &str,
) -> Option<Arc<dyn Fn(&DPattern, &DPattern) -> Ternary>> {
    match lang.space(space_name) {
        Ok(Space::External(ext)) => ext.special_equal.clone(),
        _ => None,
    }
}

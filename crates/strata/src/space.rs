//! Spaces, variants, languages, and structural membership.
//!
//! A [`Language`] is a name plus a simultaneous mapping from space names to
//! [`Space`] definitions (mutual recursion allowed). Construction interns
//! variant descriptors (same-named variants share one `Arc`, giving O(1)
//! descriptor comparison) and validates the whole definition before any rule
//! can run: dangling references, arity disagreements, duplicate address
//! tags, and inconsistent trust-recursion groups are construction-time
//! errors, not latent match-time surprises.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use strum::Display;

use crate::{
    error::{EngineError, EngineResult, Stage},
    store::Cardinality,
    value::{DPattern, MapKind},
};

/// Precision classifier for a qualified map component's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum Precision {
    Concrete,
    DiscreteAbstraction,
    Abstract,
}

/// Three-valued answer from an abstract comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Ternary {
    MustTrue,
    MustFalse,
    May,
}

impl Ternary {
    pub fn from_bool(b: bool) -> Self {
        if b { Self::MustTrue } else { Self::MustFalse }
    }

    /// Conjunction: `MustFalse` dominates, then `May`.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::MustFalse, _) | (_, Self::MustFalse) => Self::MustFalse,
            (Self::May, _) | (_, Self::May) => Self::May,
            _ => Self::MustTrue,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Self::MustTrue => Self::MustFalse,
            Self::MustFalse => Self::MustTrue,
            Self::May => Self::May,
        }
    }

    /// True unless this is `MustFalse`.
    pub fn possible(self) -> bool {
        self != Self::MustFalse
    }
}

/// One component of a variant (or a raw alternative of a user space).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    /// Reference to a space by name.
    Space(Arc<str>),
    /// Values of this component are addresses into the partition tagged so.
    Address(Arc<str>),
    /// A finite map from `domain` values to `range` values.
    Map {
        domain: Box<Component>,
        range: Box<Component>,
    },
    /// A map whose domain carries an explicit precision classifier.
    QualifiedMap {
        domain: Box<Component>,
        precision: Precision,
        range: Box<Component>,
    },
    /// A finite set of values of the inner component.
    SetOf(Box<Component>),
    /// Trusted to admit any value.
    Anything,
}

impl Component {
    pub fn space(name: impl Into<Arc<str>>) -> Self {
        Self::Space(name.into())
    }

    pub fn address(tag: impl Into<Arc<str>>) -> Self {
        Self::Address(tag.into())
    }

    pub fn map(domain: Self, range: Self) -> Self {
        Self::Map {
            domain: Box::new(domain),
            range: Box::new(range),
        }
    }

    pub fn set_of(inner: Self) -> Self {
        Self::SetOf(Box::new(inner))
    }

    /// Which map-value form this component descriptor produces.
    ///
    /// A plain `Map` and a `discrete-abstraction` domain produce a discrete
    /// finite function; a `concrete` domain is trusted as a raw dictionary;
    /// an `abstract` domain forces key-scan equality.
    pub fn map_kind(&self) -> Option<MapKind> {
        match self {
            Self::Map { .. } => Some(MapKind::Discrete),
            Self::QualifiedMap { precision, .. } => Some(match precision {
                Precision::Concrete => MapKind::Raw,
                Precision::DiscreteAbstraction => MapKind::Discrete,
                Precision::Abstract => MapKind::Abstract,
            }),
            _ => None,
        }
    }
}

/// A named, fixed-arity constructor.
///
/// Two descriptors with the same name must agree on arity; the language
/// constructor checks this and interns one canonical descriptor per name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub name: Arc<str>,
    pub components: Box<[Component]>,
}

impl Variant {
    pub fn new(name: impl Into<Arc<str>>, components: impl IntoIterator<Item = Component>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            components: components.into_iter().collect(),
        })
    }

    pub fn arity(&self) -> usize {
        self.components.len()
    }
}

/// One alternative of a user space.
#[derive(Debug, Clone)]
pub enum Alternative {
    Variant(Arc<Variant>),
    /// Inclusion of another space.
    SpaceRef(Arc<str>),
    /// A raw component descriptor.
    Component(Component),
}

/// Values defined by an opaque membership predicate.
///
/// `contains` is a plain boolean predicate. The three-valued story lives
/// only in `special_equal`, the optional equality oracle consulted by the
/// abstract matcher.
#[derive(Clone)]
pub struct ExternalSpace {
    pub name: Arc<str>,
    pub contains: Arc<dyn Fn(&DPattern) -> bool>,
    /// Per-value cardinality under abstraction.
    pub cardinality: Arc<dyn Fn(&DPattern) -> Cardinality>,
    /// Whether `cardinality` ever exceeds one.
    pub imprecise: bool,
    /// Optional must-true / must-false / may equality oracle.
    pub special_equal: Option<Arc<dyn Fn(&DPattern, &DPattern) -> Ternary>>,
}

impl ExternalSpace {
    /// An external space of precise values: membership by predicate,
    /// cardinality constantly one.
    pub fn precise(name: impl Into<Arc<str>>, contains: impl Fn(&DPattern) -> bool + 'static) -> Self {
        Self {
            name: name.into(),
            contains: Arc::new(contains),
            cardinality: Arc::new(|_| Cardinality::One),
            imprecise: false,
            special_equal: None,
        }
    }
}

impl fmt::Debug for ExternalSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSpace")
            .field("name", &self.name)
            .field("imprecise", &self.imprecise)
            .field("special_equal", &self.special_equal.is_some())
            .finish_non_exhaustive()
    }
}

/// The universe a "type" of values is drawn from.
#[derive(Debug, Clone)]
pub enum Space {
    /// A list of alternatives plus the user's assertion that the space stays
    /// finite under abstraction even if self-referential.
    User {
        alternatives: Vec<Alternative>,
        trust_recursion: bool,
    },
    /// The set of addresses stamped with `tag`.
    Address { tag: Arc<str> },
    External(ExternalSpace),
}

impl Space {
    pub fn user(alternatives: impl IntoIterator<Item = Alternative>) -> Self {
        Self::User {
            alternatives: alternatives.into_iter().collect(),
            trust_recursion: false,
        }
    }

    pub fn user_trusted(alternatives: impl IntoIterator<Item = Alternative>) -> Self {
        Self::User {
            alternatives: alternatives.into_iter().collect(),
            trust_recursion: true,
        }
    }

    pub fn address(tag: impl Into<Arc<str>>) -> Self {
        Self::Address { tag: tag.into() }
    }
}

/// A named language: the validated, interned mapping from space names to
/// spaces, plus the canonical variant descriptor registry.
#[derive(Debug, Clone)]
pub struct Language {
    name: String,
    spaces: AHashMap<Arc<str>, Space>,
    variants: AHashMap<Arc<str>, Arc<Variant>>,
}

impl Language {
    /// Validates and interns a language definition.
    ///
    /// Checks, in order: same-named variants agree on arity (the canonical
    /// descriptor registry is built here), every space/address reference
    /// resolves, address-space tags are unique, and every mutually recursive
    /// group of user spaces is consistent about `trust_recursion`.
    pub fn new(
        name: impl Into<String>,
        spaces: impl IntoIterator<Item = (Arc<str>, Space)>,
    ) -> EngineResult<Self> {
        let mut lang = Self {
            name: name.into(),
            spaces: spaces.into_iter().collect(),
            variants: AHashMap::new(),
        };
        lang.intern_variants()?;
        lang.check_references()?;
        lang.check_address_tags()?;
        lang.check_trust_recursion()?;
        Ok(lang)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks a space up by name. Undefined names are a hard error.
    pub fn space(&self, name: &str) -> EngineResult<&Space> {
        self.spaces
            .get(name)
            .ok_or_else(|| EngineError::new(Stage::InSpace, format!("undefined space `{name}`")))
    }

    /// The canonical interned descriptor for a variant name, if any space
    /// declares it.
    pub fn variant(&self, name: &str) -> Option<&Arc<Variant>> {
        self.variants.get(name)
    }

    pub fn spaces(&self) -> impl Iterator<Item = (&Arc<str>, &Space)> {
        self.spaces.iter()
    }

    fn intern_variants(&mut self) -> EngineResult<()> {
        let mut canonical: AHashMap<Arc<str>, Arc<Variant>> = AHashMap::new();
        for (space_name, space) in &self.spaces {
            let Space::User { alternatives, .. } = space else {
                continue;
            };
            for alt in alternatives {
                let Alternative::Variant(v) = alt else { continue };
                if let Some(existing) = canonical.get(&v.name) {
                    if existing.arity() != v.arity() {
                        return Err(EngineError::new(
                            Stage::Language,
                            format!(
                                "variant `{name}` declared with arity {a} and {b} (in space `{space_name}`)",
                                name = v.name,
                                a = existing.arity(),
                                b = v.arity(),
                            ),
                        ));
                    }
                } else {
                    canonical.insert(v.name.clone(), v.clone());
                }
            }
        }
        // Rewrite alternatives to point at the canonical descriptors so
        // pointer comparison works across spaces.
        for space in self.spaces.values_mut() {
            let Space::User { alternatives, .. } = space else {
                continue;
            };
            for alt in alternatives {
                if let Alternative::Variant(v) = alt {
                    *v = canonical[&v.name].clone();
                }
            }
        }
        self.variants = canonical;
        Ok(())
    }

    fn check_references(&self) -> EngineResult<()> {
        let address_tags: Vec<&Arc<str>> = self
            .spaces
            .values()
            .filter_map(|s| match s {
                Space::Address { tag } => Some(tag),
                _ => None,
            })
            .collect();
        let check_space_ref = |referrer: &Arc<str>, name: &Arc<str>| -> EngineResult<()> {
            if self.spaces.contains_key(name) {
                Ok(())
            } else {
                Err(EngineError::new(
                    Stage::Language,
                    format!("space `{referrer}` references undefined space `{name}`"),
                ))
            }
        };
        let check_tag = |referrer: &Arc<str>, tag: &Arc<str>| -> EngineResult<()> {
            if address_tags.iter().any(|t| *t == tag) {
                Ok(())
            } else {
                Err(EngineError::new(
                    Stage::Language,
                    format!("space `{referrer}` references undefined address tag `{tag}`"),
                ))
            }
        };
        for (space_name, space) in &self.spaces {
            let Space::User { alternatives, .. } = space else {
                continue;
            };
            for alt in alternatives {
                match alt {
                    Alternative::SpaceRef(name) => check_space_ref(space_name, name)?,
                    Alternative::Variant(v) => {
                        for comp in &v.components {
                            check_component(comp, &check_space_ref, &check_tag, space_name)?;
                        }
                    }
                    Alternative::Component(comp) => {
                        check_component(comp, &check_space_ref, &check_tag, space_name)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_address_tags(&self) -> EngineResult<()> {
        let mut seen: AHashMap<&Arc<str>, &Arc<str>> = AHashMap::new();
        for (space_name, space) in &self.spaces {
            let Space::Address { tag } = space else { continue };
            if let Some(first) = seen.insert(tag, space_name) {
                return Err(EngineError::new(
                    Stage::Language,
                    format!("address tag `{tag}` declared by both `{first}` and `{space_name}`"),
                ));
            }
        }
        Ok(())
    }

    /// Mutually recursive user spaces must either all or none declare
    /// `trust_recursion`. Recursion through an address component does not
    /// count: the store carries that recursion, so the space stays finite.
    fn check_trust_recursion(&self) -> EngineResult<()> {
        let user_spaces: Vec<&Arc<str>> = self
            .spaces
            .iter()
            .filter(|(_, s)| matches!(s, Space::User { .. }))
            .map(|(n, _)| n)
            .collect();
        for &a in &user_spaces {
            for &b in &user_spaces {
                if a == b || !self.reaches(a, b) || !self.reaches(b, a) {
                    continue;
                }
                let (ta, tb) = (self.trusts(a), self.trusts(b));
                if ta != tb {
                    return Err(EngineError::new(
                        Stage::Language,
                        format!(
                            "mutually recursive spaces `{a}` and `{b}` disagree on trust-recursion"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn trusts(&self, name: &str) -> bool {
        matches!(
            self.spaces.get(name),
            Some(Space::User {
                trust_recursion: true,
                ..
            })
        )
    }

    /// Whether `from` reaches `to` through space references (DFS).
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack: Vec<&str> = vec![from];
        let mut seen: Vec<&str> = Vec::new();
        while let Some(name) = stack.pop() {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            let Some(Space::User { alternatives, .. }) = self.spaces.get(name) else {
                continue;
            };
            for alt in alternatives {
                match alt {
                    Alternative::SpaceRef(n) => {
                        if &**n == to {
                            return true;
                        }
                        stack.push(n.as_ref());
                    }
                    Alternative::Variant(v) => {
                        for comp in &v.components {
                            if component_reaches(comp, to, &mut stack) {
                                return true;
                            }
                        }
                    }
                    Alternative::Component(comp) => {
                        if component_reaches(comp, to, &mut stack) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// `in-space`: does `d` lie in the named space?
    pub fn in_space(&self, space_name: &str, d: &DPattern) -> EngineResult<bool> {
        self.in_space_seen(space_name, d, &mut Vec::new())
    }

    /// `in-variant`: is `d` a value of this variant, children included?
    pub fn in_variant(&self, variant: &Variant, d: &DPattern) -> EngineResult<bool> {
        let DPattern::Variant(vv) = d else {
            return Ok(false);
        };
        if vv.variant.name != variant.name || vv.children.len() != variant.arity() {
            return Ok(false);
        }
        for (comp, child) in variant.components.iter().zip(&vv.children) {
            if !self.in_component(comp, child)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `in-component`: does `d` satisfy a component descriptor?
    pub fn in_component(&self, comp: &Component, d: &DPattern) -> EngineResult<bool> {
        match comp {
            Component::Space(name) => self.in_space(name, d),
            Component::Address(tag) => Ok(matches!(d, DPattern::Addr(a) if a.space == *tag)),
            Component::Map { domain, range } | Component::QualifiedMap { domain, range, .. } => {
                let DPattern::Map(m) = d else {
                    return Ok(false);
                };
                for (k, v) in &m.entries {
                    if !self.in_component(domain, k)? || !self.in_component(range, v)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Component::SetOf(inner) => {
                let DPattern::Set(s) = d else {
                    return Ok(false);
                };
                for e in &s.elems {
                    if !self.in_component(inner, e)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Component::Anything => Ok(true),
        }
    }

    /// `seen` guards reference-chain cycles (`A = B`, `B = A`) that do not
    /// descend into `d`; it resets on every structural descent.
    fn in_space_seen(&self, space_name: &str, d: &DPattern, seen: &mut Vec<Arc<str>>) -> EngineResult<bool> {
        if seen.iter().any(|n| &**n == space_name) {
            return Ok(false);
        }
        match self.space(space_name)? {
            Space::User { alternatives, .. } => {
                seen.push(Arc::from(space_name));
                for alt in alternatives {
                    let hit = match alt {
                        Alternative::Variant(v) => self.in_variant(v, d)?,
                        Alternative::SpaceRef(name) => self.in_space_seen(name, d, seen)?,
                        Alternative::Component(comp) => self.in_component(comp, d)?,
                    };
                    if hit {
                        seen.pop();
                        return Ok(true);
                    }
                }
                seen.pop();
                Ok(false)
            }
            // Both address kinds are members, as long as the tag matches.
            Space::Address { tag } => Ok(matches!(d, DPattern::Addr(a) if a.space == *tag)),
            Space::External(ext) => {
                if let DPattern::External(e) = d {
                    if e.space == ext.name {
                        return Ok(true);
                    }
                }
                Ok((ext.contains)(d))
            }
        }
    }
}

fn check_component(
    comp: &Component,
    check_space_ref: &impl Fn(&Arc<str>, &Arc<str>) -> EngineResult<()>,
    check_tag: &impl Fn(&Arc<str>, &Arc<str>) -> EngineResult<()>,
    referrer: &Arc<str>,
) -> EngineResult<()> {
    match comp {
        Component::Space(name) => check_space_ref(referrer, name),
        Component::Address(tag) => check_tag(referrer, tag),
        Component::Map { domain, range } | Component::QualifiedMap { domain, range, .. } => {
            check_component(domain, check_space_ref, check_tag, referrer)?;
            check_component(range, check_space_ref, check_tag, referrer)
        }
        Component::SetOf(inner) => check_component(inner, check_space_ref, check_tag, referrer),
        Component::Anything => Ok(()),
    }
}

fn component_reaches<'a>(comp: &'a Component, to: &str, stack: &mut Vec<&'a str>) -> bool {
    match comp {
        Component::Space(name) => {
            if &**name == to {
                return true;
            }
            stack.push(name.as_ref());
            false
        }
        // Address components break structural recursion: the store owns it.
        Component::Address(_) | Component::Anything => false,
        Component::Map { domain, range } | Component::QualifiedMap { domain, range, .. } => {
            component_reaches(domain, to, stack) || component_reaches(range, to, stack)
        }
        Component::SetOf(inner) => component_reaches(inner, to, stack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Address, AddrName, MapValue, SetValue, VariantValue};

    fn lambda_language() -> Language {
        // E = (App E E) | (Lam x E) | (Var x); x is any symbol.
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
                        matches!(d, DPattern::Atom(crate::value::Atom::Symbol(_)))
                    })),
                ),
            ],
        )
        .unwrap()
    }

    fn term_var(lang: &Language, x: &str) -> DPattern {
        DPattern::Variant(Box::new(VariantValue::new(
            lang.variant("Var").unwrap().clone(),
            [DPattern::symbol(x)],
        )))
    }

    /// A well-typed term satisfies `in_space`.
    #[test]
    fn variant_membership() {
        let lang = lambda_language();
        let term = term_var(&lang, "a");
        assert!(lang.in_space("E", &term).unwrap());
        assert!(!lang.in_space("E", &DPattern::number(3)).unwrap());
    }

    /// Undefined space names are a hard error, not a miss.
    #[test]
    fn undefined_space_is_an_error() {
        let lang = lambda_language();
        let err = lang.in_space("Nope", &DPattern::number(1)).unwrap_err();
        assert_eq!(err.stage, Stage::InSpace);
    }

    /// Same-named variants with different arities are rejected at
    /// construction.
    #[test]
    fn arity_disagreement_rejected() {
        let v1 = Variant::new("V", [Component::Anything]);
        let v2 = Variant::new("V", [Component::Anything, Component::Anything]);
        let err = Language::new(
            "bad",
            [
                (Arc::from("A"), Space::user([Alternative::Variant(v1)])),
                (Arc::from("B"), Space::user([Alternative::Variant(v2)])),
            ],
        )
        .unwrap_err();
        assert_eq!(err.stage, Stage::Language);
    }

    /// Dangling space references are rejected at construction.
    #[test]
    fn dangling_reference_rejected() {
        let err = Language::new(
            "bad",
            [(Arc::from("A"), Space::user([Alternative::SpaceRef(Arc::from("Ghost"))]))],
        )
        .unwrap_err();
        assert_eq!(err.stage, Stage::Language);
        assert!(err.message.contains("Ghost"), "message should name the dangling space: {err}");
    }

    /// Two address spaces may not share a tag.
    #[test]
    fn duplicate_address_tags_rejected() {
        let err = Language::new(
            "bad",
            [
                (Arc::from("H1"), Space::address("A")),
                (Arc::from("H2"), Space::address("A")),
            ],
        )
        .unwrap_err();
        assert_eq!(err.stage, Stage::Language);
    }

    /// Mutually recursive user spaces must agree on trust-recursion.
    #[test]
    fn inconsistent_trust_recursion_rejected() {
        let err = Language::new(
            "bad",
            [
                (Arc::from("A"), Space::user_trusted([Alternative::SpaceRef(Arc::from("B"))])),
                (Arc::from("B"), Space::user([Alternative::SpaceRef(Arc::from("A"))])),
            ],
        )
        .unwrap_err();
        assert_eq!(err.stage, Stage::Language);
    }

    /// Interning makes same-named descriptors pointer-identical across
    /// spaces.
    #[test]
    fn variant_descriptors_are_interned() {
        let v1 = Variant::new("V", [Component::Anything]);
        let v2 = Variant::new("V", [Component::Anything]);
        let lang = Language::new(
            "ok",
            [
                (Arc::from("A"), Space::user([Alternative::Variant(v1)])),
                (Arc::from("B"), Space::user([Alternative::Variant(v2)])),
            ],
        )
        .unwrap();
        let spaces: Vec<_> = lang.spaces().collect();
        let mut arcs = Vec::new();
        for (_, space) in spaces {
            if let Space::User { alternatives, .. } = space {
                for alt in alternatives {
                    if let Alternative::Variant(v) = alt {
                        arcs.push(v.clone());
                    }
                }
            }
        }
        assert_eq!(arcs.len(), 2);
        assert!(Arc::ptr_eq(&arcs[0], &arcs[1]), "same-named descriptors should be interned");
    }

    /// Address-space membership accepts both address kinds stamped with the
    /// right tag.
    #[test]
    fn address_space_membership() {
        let lang = Language::new("addr", [(Arc::from("Heap"), Space::address("A"))]).unwrap();
        let egal = DPattern::Addr(Address::egal("A", AddrName::Fresh(0)));
        let structural = DPattern::Addr(Address::structural("A", AddrName::Fresh(1)));
        let wrong = DPattern::Addr(Address::egal("B", AddrName::Fresh(0)));
        assert!(lang.in_space("Heap", &egal).unwrap());
        assert!(lang.in_space("Heap", &structural).unwrap());
        assert!(!lang.in_space("Heap", &wrong).unwrap());
    }

    /// Map components check every key and value; set components every
    /// element.
    #[test]
    fn map_and_set_component_membership() {
        let lang = lambda_language();
        let comp = Component::map(Component::space("X"), Component::space("E"));
        let map = DPattern::Map(MapValue::discrete([(
            DPattern::symbol("x"),
            term_var(&lang, "y"),
        )]));
        assert!(lang.in_component(&comp, &map).unwrap());

        let bad = DPattern::Map(MapValue::discrete([(DPattern::number(1), term_var(&lang, "y"))]));
        assert!(!lang.in_component(&comp, &bad).unwrap());

        let set_comp = Component::set_of(Component::space("X"));
        let set = DPattern::Set(SetValue::from_elems([DPattern::symbol("a")]));
        assert!(lang.in_component(&set_comp, &set).unwrap());
    }

    /// Reference-chain cycles that never descend structurally terminate.
    #[test]
    fn cyclic_space_references_terminate() {
        let lang = Language::new(
            "cyc",
            [
                (Arc::from("A"), Space::user_trusted([Alternative::SpaceRef(Arc::from("B"))])),
                (Arc::from("B"), Space::user_trusted([Alternative::SpaceRef(Arc::from("A"))])),
            ],
        )
        .unwrap();
        assert!(!lang.in_space("A", &DPattern::number(1)).unwrap());
    }
}

//! The fully-evaluated term model: atoms, variants, maps, sets, addresses,
//! and external values.
//!
//! A [`DPattern`] is a *data* pattern — a term with nothing left to bind.
//! Recursion never lives inside a `DPattern` itself: recursive structure is
//! carried by [`Address`] values pointing into a store partition, so the
//! store is the single ownership root and terms stay acyclic.

use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use smallvec::SmallVec;

use crate::space::Variant;

/// Atomic values. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Atom {
    /// Arbitrary-precision integer.
    Number(BigInt),
    Bool(bool),
    /// A symbol. `Arc<str>` keeps clones cheap; symbols are compared by
    /// content, not identity.
    Symbol(Arc<str>),
    Char(char),
    Text(String),
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(true) => write!(f, "#t"),
            Self::Bool(false) => write!(f, "#f"),
            Self::Symbol(s) => write!(f, "{s}"),
            Self::Char(' ') => write!(f, "#\\space"),
            Self::Char('\n') => write!(f, "#\\newline"),
            Self::Char('\t') => write!(f, "#\\tab"),
            Self::Char(c) => write!(f, "#\\{c}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// How an address compares to another address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddrKind {
    /// Comparison dereferences both sides through the store and compares the
    /// stored values structurally.
    Structural,
    /// Comparison is purely by syntactic identity of (space tag, identifier).
    Egal,
}

/// Identifier part of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddrName {
    /// Concrete allocation: globally fresh within a run.
    Fresh(u64),
    /// Abstract allocation: deterministic in (rule name, allocation site,
    /// optional client hint), so re-allocating at the same site in the same
    /// rule yields the *same* address and bumps its cardinality instead.
    Site {
        rule: Arc<str>,
        site: u32,
        hint: Option<Box<DPattern>>,
    },
    /// Parsed from a serialized identifier.
    Named(Arc<str>),
}

impl fmt::Display for AddrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh(n) => write!(f, "@{n}"),
            Self::Site { rule, site, hint: None } => write!(f, "@{rule}:{site}"),
            Self::Site { rule, site, hint: Some(h) } => write!(f, "@{rule}:{site}[{h}]"),
            Self::Named(s) => write!(f, "{s}"),
        }
    }
}

/// A handle into a store partition.
///
/// The `space` tag selects the partition; the `name` is the identifier
/// within it. Two addresses with equal tag and name are the same slot no
/// matter their kind — the kind only governs how the *matcher* compares an
/// address with another value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: AddrKind,
    /// Address-space tag; selects the store partition.
    pub space: Arc<str>,
    pub name: AddrName,
}

impl Address {
    pub fn structural(space: impl Into<Arc<str>>, name: AddrName) -> Self {
        Self {
            kind: AddrKind::Structural,
            space: space.into(),
            name,
        }
    }

    pub fn egal(space: impl Into<Arc<str>>, name: AddrName) -> Self {
        Self {
            kind: AddrKind::Egal,
            space: space.into(),
            name,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddrKind::Structural => write!(f, "&{name}", name = self.name),
            AddrKind::Egal => write!(f, "{name}", name = self.name),
        }
    }
}

/// Which equality story a map value's domain supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MapKind {
    /// Domain values are concrete; hash lookup is exact.
    Discrete,
    /// Domain values may be abstract; every lookup must also scan keys
    /// under the matcher's own equality.
    Abstract,
    /// A raw dictionary trusted as discrete.
    Raw,
}

/// A finite map value. The surrounding component descriptor governs which
/// [`MapKind`] is produced.
#[derive(Debug, Clone)]
pub struct MapValue {
    pub kind: MapKind,
    pub entries: IndexMap<DPattern, DPattern>,
}

impl MapValue {
    pub fn new(kind: MapKind) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
        }
    }

    /// Builds a discrete map from an entry iterator.
    pub fn discrete(entries: impl IntoIterator<Item = (DPattern, DPattern)>) -> Self {
        Self {
            kind: MapKind::Discrete,
            entries: entries.into_iter().collect(),
        }
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        // IndexMap equality is order-insensitive.
        self.kind == other.kind && self.entries == other.entries
    }
}

impl Eq for MapValue {}

impl Hash for MapValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        state.write_u64(unordered_hash(self.entries.iter()));
    }
}

/// A finite set of DPatterns.
#[derive(Debug, Clone, Default)]
pub struct SetValue {
    pub elems: IndexSet<DPattern>,
}

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elems(elems: impl IntoIterator<Item = DPattern>) -> Self {
        Self {
            elems: elems.into_iter().collect(),
        }
    }
}

impl PartialEq for SetValue {
    fn eq(&self, other: &Self) -> bool {
        self.elems == other.elems
    }
}

impl Eq for SetValue {}

impl Hash for SetValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(unordered_hash(self.elems.iter()));
    }
}

/// A host value tagged with the external space it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalValue {
    /// Name of the external space this value is drawn from.
    pub space: Arc<str>,
    pub payload: Box<DPattern>,
}

/// A variant value: a pointer to its interned descriptor plus one child per
/// component.
///
/// Equality compares the descriptor by pointer first (descriptors are
/// interned per language) and falls back to name comparison, then compares
/// children pairwise. Hashing uses only the name so the pointer fast path
/// stays an implementation detail.
#[derive(Debug, Clone)]
pub struct VariantValue {
    pub variant: Arc<Variant>,
    pub children: SmallVec<[DPattern; 4]>,
}

impl VariantValue {
    /// Pairs a descriptor with its children. Callers are responsible for
    /// arity; RHS instantiation checks it and reports a structural error.
    pub fn new(variant: Arc<Variant>, children: impl IntoIterator<Item = DPattern>) -> Self {
        let children: SmallVec<[DPattern; 4]> = children.into_iter().collect();
        debug_assert_eq!(variant.components.len(), children.len());
        Self { variant, children }
    }
}

impl PartialEq for VariantValue {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.variant, &other.variant) || self.variant.name == other.variant.name)
            && self.children == other.children
    }
}

impl Eq for VariantValue {}

impl Hash for VariantValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant.name.hash(state);
        self.children.hash(state);
    }
}

/// A fully-evaluated term value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DPattern {
    Atom(Atom),
    Variant(Box<VariantValue>),
    Map(MapValue),
    Set(SetValue),
    Addr(Address),
    External(ExternalValue),
}

impl DPattern {
    /// Shorthand for a number atom.
    pub fn number(n: impl Into<BigInt>) -> Self {
        Self::Atom(Atom::Number(n.into()))
    }

    /// Shorthand for a symbol atom.
    pub fn symbol(s: impl Into<Arc<str>>) -> Self {
        Self::Atom(Atom::Symbol(s.into()))
    }

    /// Shorthand for a string atom.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Atom(Atom::Text(s.into()))
    }

    /// Truthiness for `If`/`When` scrutinees: everything except `#f` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Atom(Atom::Bool(false)))
    }

    /// The address inside, if this is an address value of either kind.
    pub fn as_addr(&self) -> Option<&Address> {
        match self {
            Self::Addr(a) => Some(a),
            _ => None,
        }
    }

    /// Every address reachable without going through the store.
    ///
    /// Used by tests to check the frame invariant: a rule's output may only
    /// mention addresses that were already reachable or freshly allocated.
    pub fn addresses(&self) -> Vec<&Address> {
        let mut out = Vec::new();
        self.collect_addresses(&mut out);
        out
    }

    fn collect_addresses<'a>(&'a self, out: &mut Vec<&'a Address>) {
        match self {
            Self::Atom(_) => {}
            Self::Variant(v) => {
                for child in &v.children {
                    child.collect_addresses(out);
                }
            }
            Self::Map(m) => {
                for (k, v) in &m.entries {
                    k.collect_addresses(out);
                    v.collect_addresses(out);
                }
            }
            Self::Set(s) => {
                for e in &s.elems {
                    e.collect_addresses(out);
                }
            }
            Self::Addr(a) => out.push(a),
            Self::External(e) => e.payload.collect_addresses(out),
        }
    }
}

impl From<bool> for DPattern {
    fn from(v: bool) -> Self {
        Self::Atom(Atom::Bool(v))
    }
}

impl From<i64> for DPattern {
    fn from(v: i64) -> Self {
        Self::number(v)
    }
}

impl From<BigInt> for DPattern {
    fn from(v: BigInt) -> Self {
        Self::Atom(Atom::Number(v))
    }
}

impl From<Atom> for DPattern {
    fn from(v: Atom) -> Self {
        Self::Atom(v)
    }
}

impl From<Address> for DPattern {
    fn from(v: Address) -> Self {
        Self::Addr(v)
    }
}

impl fmt::Display for DPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::sexp::write_term(f, self)
    }
}

/// Order-insensitive hash of a collection.
///
/// Each item is hashed into its own hasher and the 64-bit digests are
/// combined with wrapping addition, so two collections holding the same
/// items hash equally regardless of insertion order. Required for maps,
/// sets, and stores to satisfy the `Eq`/`Hash` contract, since their
/// equality is order-insensitive.
pub(crate) fn unordered_hash<T: Hash>(items: impl Iterator<Item = T>) -> u64 {
    let mut acc = 0u64;
    for item in items {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        acc = acc.wrapping_add(hasher.finish());
    }
    acc
}

#[cfg(test)]
mod tests {
    use std::hash::{Hash, Hasher};

    use super::*;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    /// Maps with the same entries inserted in different orders are equal and
    /// hash equally.
    #[test]
    fn map_hash_is_order_insensitive() {
        let ab = MapValue::discrete([
            (DPattern::symbol("a"), DPattern::number(1)),
            (DPattern::symbol("b"), DPattern::number(2)),
        ]);
        let ba = MapValue::discrete([
            (DPattern::symbol("b"), DPattern::number(2)),
            (DPattern::symbol("a"), DPattern::number(1)),
        ]);
        assert_eq!(ab, ba);
        assert_eq!(hash_of(&ab), hash_of(&ba), "equal maps must hash equally");
    }

    /// Sets compare and hash without regard to insertion order.
    #[test]
    fn set_hash_is_order_insensitive() {
        let s1 = SetValue::from_elems([DPattern::number(1), DPattern::number(2)]);
        let s2 = SetValue::from_elems([DPattern::number(2), DPattern::number(1)]);
        assert_eq!(s1, s2);
        assert_eq!(hash_of(&s1), hash_of(&s2), "equal sets must hash equally");
    }

    /// Maps with the same entries but different kinds are distinct values.
    #[test]
    fn map_kind_distinguishes_values() {
        let discrete = MapValue::discrete([(DPattern::number(1), DPattern::number(2))]);
        let mut raw = MapValue::new(MapKind::Raw);
        raw.entries.insert(DPattern::number(1), DPattern::number(2));
        assert_ne!(DPattern::Map(discrete), DPattern::Map(raw));
    }

    /// Egal addresses compare by (kind, tag, identifier) syntactically.
    #[test]
    fn egal_addresses_compare_syntactically() {
        let a = Address::egal("A", AddrName::Fresh(0));
        let b = Address::egal("A", AddrName::Fresh(0));
        let c = Address::egal("A", AddrName::Fresh(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    /// Truthiness: only `#f` is false.
    #[test]
    fn truthiness() {
        assert!(!DPattern::from(false).is_truthy());
        assert!(DPattern::from(true).is_truthy());
        assert!(DPattern::number(0).is_truthy());
        assert!(DPattern::Set(SetValue::new()).is_truthy());
    }
}

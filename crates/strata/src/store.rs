//! The store: address-keyed, space-partitioned, with per-address
//! cardinality for the abstract interpreter.
//!
//! Every entry is a *join set* of DPatterns. Concrete execution only ever
//! writes strongly, so its entries stay singletons; abstract weak writes
//! union into the set, which is exactly the "reading after two writes
//! returns the set-join of both written values" behavior. The store is
//! passed by value: updates clone, so no aliasing hazards exist.

use std::{
    collections::{BTreeMap, hash_map::DefaultHasher},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use strum::Display;

use crate::{
    error::{EngineError, EngineResult, Stage},
    value::{AddrName, Address, DPattern, unordered_hash},
};

/// Upper bound on how many concrete values a single abstract address
/// denotes. The lattice order is `0 < 1 < ω`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, serde::Serialize, serde::Deserialize,
)]
pub enum Cardinality {
    /// Unreachable.
    #[strum(serialize = "0")]
    Zero,
    /// Exactly one concrete value; strong updates are sound.
    #[strum(serialize = "1")]
    One,
    /// Possibly many concrete values; writes must be weak.
    #[strum(serialize = "ω")]
    Many,
}

impl Cardinality {
    /// The transition an allocation makes: `0→1`, `1→ω`, `ω→ω`.
    pub fn bump(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One | Self::Many => Self::Many,
        }
    }

    /// Least upper bound.
    pub fn join(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Per-address cardinality map carried by an abstract state.
///
/// Keyed by the full address (tag and identifier) so counts never merge
/// across partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counts {
    map: AHashMap<Address, Cardinality>,
}

impl Counts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cardinality of an address; unmapped addresses are `0`.
    pub fn get(&self, addr: &Address) -> Cardinality {
        self.map.get(addr).copied().unwrap_or(Cardinality::Zero)
    }

    /// Applies the allocation transition to an address and returns the new
    /// count.
    pub fn bump(&mut self, addr: &Address) -> Cardinality {
        let next = self.get(addr).bump();
        self.map.insert(addr.clone(), next);
        next
    }

    pub fn set(&mut self, addr: Address, cardinality: Cardinality) {
        self.map.insert(addr, cardinality);
    }

    /// How many addresses have saturated to `ω`.
    pub fn saturated(&self) -> usize {
        self.map.values().filter(|&&c| c == Cardinality::Many).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, Cardinality)> {
        self.map.iter().map(|(a, &c)| (a, c))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Hash for Counts {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(unordered_hash(self.map.iter()));
    }
}

/// Per-run fresh-name source for concrete allocation.
///
/// Scoped to a run context rather than process-wide, so reductions stay
/// reentrant and tests deterministic. Abstract allocation never touches it.
#[derive(Debug, Clone, Default)]
pub struct AddrGen {
    next: u64,
}

impl AddrGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// A globally fresh identifier for this run.
    pub fn fresh(&mut self) -> AddrName {
        let n = self.next;
        self.next += 1;
        AddrName::Fresh(n)
    }
}

/// Snapshot of store shape: entry counts per partition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Entry count per address-space tag. `BTreeMap` for deterministic
    /// iteration, suitable for display and comparison.
    pub entries_by_partition: BTreeMap<String, usize>,
    /// Total entries across partitions.
    pub total_entries: usize,
    /// Entries whose join set holds more than one value.
    pub joined_entries: usize,
}

/// Mapping from address-space tag to a partition mapping identifiers to
/// join sets of stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Store {
    partitions: IndexMap<Arc<str>, IndexMap<AddrName, IndexSet<DPattern>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// The join set stored at an address. A miss is always an error.
    pub fn lookup(&self, addr: &Address) -> EngineResult<&IndexSet<DPattern>> {
        self.get(addr).ok_or_else(|| {
            EngineError::with_value(
                Stage::ExprEval,
                format!("store-lookup on unmapped address in `{space}`", space = addr.space),
                DPattern::Addr(addr.clone()),
            )
        })
    }

    /// Concrete lookup: the single stored value.
    ///
    /// Concrete execution maintains singleton entries; a joined entry here
    /// means an abstract store leaked into a concrete reduction.
    pub fn lookup_one(&self, addr: &Address) -> EngineResult<&DPattern> {
        let entry = self.lookup(addr)?;
        if entry.len() > 1 {
            return Err(EngineError::with_value(
                Stage::ExprEval,
                "concrete store-lookup found a joined entry",
                DPattern::Addr(addr.clone()),
            ));
        }
        Ok(entry.first().unwrap_or_else(|| unreachable!("store entries are never empty")))
    }

    pub fn get(&self, addr: &Address) -> Option<&IndexSet<DPattern>> {
        self.partitions.get(&addr.space)?.get(&addr.name)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.get(addr).is_some()
    }

    /// Overwrites the entry with a singleton.
    pub fn write_strong(&mut self, addr: &Address, value: DPattern) {
        let entry = self.entry_mut(addr);
        entry.clear();
        entry.insert(value);
    }

    /// Joins the value into the entry.
    pub fn write_weak(&mut self, addr: &Address, value: DPattern) {
        self.entry_mut(addr).insert(value);
    }

    /// Count-directed write: strong when the address denotes at most one
    /// concrete value or the user asserts uniqueness, weak otherwise.
    pub fn write_counted(&mut self, addr: &Address, value: DPattern, counts: &Counts, trust_strong: bool) {
        if trust_strong || counts.get(addr) <= Cardinality::One {
            self.write_strong(addr, value);
        } else {
            self.write_weak(addr, value);
        }
    }

    fn entry_mut(&mut self, addr: &Address) -> &mut IndexSet<DPattern> {
        self.partitions
            .entry(addr.space.clone())
            .or_default()
            .entry(addr.name.clone())
            .or_default()
    }

    /// Iterates `(tag, identifier, join set)` over every entry.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &AddrName, &IndexSet<DPattern>)> {
        self.partitions
            .iter()
            .flat_map(|(tag, part)| part.iter().map(move |(name, vals)| (tag, name, vals)))
    }

    /// The named partition, if it exists. Backs the unsafe store-ref escape
    /// hatches of the expression language.
    pub fn partition(&self, tag: &str) -> Option<&IndexMap<AddrName, IndexSet<DPattern>>> {
        self.partitions.get(tag)
    }

    /// Iterates `(tag, partition)` pairs.
    pub fn partitions(&self) -> impl Iterator<Item = (&Arc<str>, &IndexMap<AddrName, IndexSet<DPattern>>)> {
        self.partitions.iter()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for (tag, part) in &self.partitions {
            stats.entries_by_partition.insert(tag.to_string(), part.len());
            stats.total_entries += part.len();
            stats.joined_entries += part.values().filter(|vals| vals.len() > 1).count();
        }
        stats
    }
}

impl Hash for Store {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut acc = 0u64;
        for (tag, part) in &self.partitions {
            let mut hasher = DefaultHasher::new();
            tag.hash(&mut hasher);
            hasher.write_u64(unordered_hash(
                part.iter().map(|(name, vals)| (name, unordered_hash(vals.iter()))),
            ));
            acc = acc.wrapping_add(hasher.finish());
        }
        state.write_u64(acc);
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (tag, name, vals) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{tag}/{name} ↦ ")?;
            if vals.len() == 1 {
                write!(f, "{v}", v = vals.first().unwrap_or_else(|| unreachable!()))?;
            } else {
                write!(f, "{{")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::structural("A", AddrName::Fresh(n))
    }

    /// Cardinality transitions: 0→1, 1→ω, ω→ω.
    #[test]
    fn cardinality_bump_transitions() {
        assert_eq!(Cardinality::Zero.bump(), Cardinality::One);
        assert_eq!(Cardinality::One.bump(), Cardinality::Many);
        assert_eq!(Cardinality::Many.bump(), Cardinality::Many);
    }

    /// Strong writes overwrite; the entry stays a singleton.
    #[test]
    fn strong_write_overwrites() {
        let mut store = Store::new();
        let a = addr(0);
        store.write_strong(&a, DPattern::number(1));
        store.write_strong(&a, DPattern::number(2));
        let entry = store.lookup(&a).unwrap();
        assert_eq!(entry.len(), 1);
        assert_eq!(store.lookup_one(&a).unwrap(), &DPattern::number(2));
    }

    /// Weak writes join with prior contents.
    #[test]
    fn weak_write_joins() {
        let mut store = Store::new();
        let a = addr(0);
        store.write_weak(&a, DPattern::number(1));
        store.write_weak(&a, DPattern::number(2));
        let entry = store.lookup(&a).unwrap();
        assert_eq!(entry.len(), 2, "both written values should be present: {entry:?}");
    }

    /// The count-directed policy: strong at `1`, weak at `ω`, and
    /// trust-strong overrides saturation.
    #[test]
    fn counted_write_policy() {
        let mut store = Store::new();
        let mut counts = Counts::new();
        let a = addr(0);

        counts.bump(&a); // 1
        store.write_counted(&a, DPattern::number(1), &counts, false);
        store.write_counted(&a, DPattern::number(2), &counts, false);
        assert_eq!(store.lookup(&a).unwrap().len(), 1, "count 1 writes are strong");

        counts.bump(&a); // ω
        store.write_counted(&a, DPattern::number(3), &counts, false);
        assert_eq!(store.lookup(&a).unwrap().len(), 2, "count ω writes are weak");

        store.write_counted(&a, DPattern::number(4), &counts, true);
        assert_eq!(store.lookup(&a).unwrap().len(), 1, "trust-strong forces a strong update");
    }

    /// A miss on lookup is an error carrying the address.
    #[test]
    fn lookup_miss_is_error() {
        let store = Store::new();
        let err = store.lookup(&addr(7)).unwrap_err();
        assert_eq!(err.stage, Stage::ExprEval);
        assert!(err.offending.is_some(), "the offending address should be attached");
    }

    /// Stores with the same entries written in different orders are equal
    /// and hash equally.
    #[test]
    fn store_hash_is_order_insensitive() {
        let mut s1 = Store::new();
        s1.write_strong(&addr(0), DPattern::number(1));
        s1.write_strong(&addr(1), DPattern::number(2));
        let mut s2 = Store::new();
        s2.write_strong(&addr(1), DPattern::number(2));
        s2.write_strong(&addr(0), DPattern::number(1));
        assert_eq!(s1, s2);

        let hash = |s: &Store| {
            let mut h = DefaultHasher::new();
            s.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&s1), hash(&s2), "equal stores must hash equally");
    }

    /// Fresh names from one generator never collide.
    #[test]
    fn addr_gen_is_monotonic() {
        let mut g = AddrGen::new();
        assert_ne!(g.fresh(), g.fresh());
    }

    /// Stats report per-partition entry counts and joined entries.
    #[test]
    fn stats_reflect_partitions() {
        let mut store = Store::new();
        store.write_strong(&addr(0), DPattern::number(1));
        store.write_weak(&addr(1), DPattern::number(2));
        store.write_weak(&addr(1), DPattern::number(3));
        let stats = store.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.joined_entries, 1);
        assert_eq!(stats.entries_by_partition.get("A"), Some(&2));
    }
}

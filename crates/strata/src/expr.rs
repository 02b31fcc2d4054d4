//! The expression language and its evaluator.
//!
//! Expressions are evaluated against `(environment, store [, counts])` and
//! return a *set* of effectful results. For multi-argument forms,
//! sub-expressions are evaluated left-to-right and each sub-result's store
//! threads into the next sub-expression, so a single expression may fan out
//! into the product of its sub-result counts. Results are deduplicated:
//! non-determinism is a set, never a list.
//!
//! Every expression carries a [`StoreInteraction`] classifier. It is an
//! optimization hint only (pure expressions can be memoized, write-only
//! ones turned into deltas); it never affects observable behavior.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::{
    error::{EngineError, EngineResult, Stage},
    pattern::{Env, Pattern, Quality, match_abstract, match_concrete, values_equal, values_equal_abs},
    rules::Semantics,
    space::{Language, Ternary},
    store::{AddrGen, Cardinality, Counts, Store},
    tracer::ReductionTracer,
    value::{AddrKind, AddrName, Address, DPattern, MapKind, MapValue, SetValue},
};

/// Which interpreter is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Exact semantics; one result per deterministic choice.
    Concrete,
    /// Finitary over-approximation with explicit non-determinism and
    /// cardinality tracking.
    Abstract,
}

/// Store-interaction classifier: a small bitset describing how an
/// expression may touch the store. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreInteraction {
    /// May read the store.
    pub read: bool,
    /// May write the store.
    pub write: bool,
    /// May consult or modify cardinality counts.
    pub cardinality: bool,
    /// May allocate fresh addresses.
    pub alloc: bool,
    /// May produce more than one result.
    pub many: bool,
}

impl StoreInteraction {
    pub const PURE: Self = Self {
        read: false,
        write: false,
        cardinality: false,
        alloc: false,
        many: false,
    };

    pub fn union(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
            cardinality: self.cardinality || other.cardinality,
            alloc: self.alloc || other.alloc,
            many: self.many || other.many,
        }
    }

    /// No writes and no allocation: evaluation cannot change the state, so
    /// concrete results are memoizable.
    pub fn is_pure(self) -> bool {
        !self.write && !self.alloc
    }
}

/// One form of a binding list (used by `Let` bodies and rule
/// side-conditions). Forms are evaluated in textual order; effects thread
/// into subsequent forms.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingForm {
    /// Evaluate `expr`, match `pat` against each resulting value; failure
    /// prunes that branch.
    Bind { pat: Pattern, expr: Expr },
    /// Evaluate `key` and `value`, write the store. No value binding.
    StoreExtend {
        key: Expr,
        value: Expr,
        trust_strong: bool,
    },
    /// Evaluate the guard; falsy prunes the branch.
    When(Expr),
}

impl BindingForm {
    pub(crate) fn number_sites(&mut self, next: &mut u32) {
        match self {
            Self::Bind { expr, .. } | Self::When(expr) => expr.number_sites(next),
            Self::StoreExtend { key, value, .. } => {
                key.number_sites(next);
                value.number_sites(next);
            }
        }
    }

    pub(crate) fn interaction(&self) -> StoreInteraction {
        match self {
            Self::Bind { expr, .. } | Self::When(expr) => expr.interaction(),
            Self::StoreExtend { key, value, .. } => {
                let mut i = key.interaction().union(value.interaction());
                i.write = true;
                i
            }
        }
    }
}

/// The recognized expression forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Instantiates a pattern against the current environment. No effect.
    Term(Pattern),
    /// A literal boolean.
    Bool(bool),
    /// Looks `key` up in the map bound to `map`; on miss evaluates the
    /// default, or errors if there is none.
    MapLookup {
        map: Arc<str>,
        key: Box<Expr>,
        default: Option<Box<Expr>>,
    },
    /// A new map extended with `key ↦ value`. `trust_strong` asserts the
    /// update is strong even when the key is a saturated abstract address.
    MapExtend {
        map: Box<Expr>,
        key: Box<Expr>,
        value: Box<Expr>,
        trust_strong: bool,
    },
    /// Reads the store at the evaluated address.
    StoreLookup { key: Box<Expr> },
    /// Scrutinizes the guard and evaluates one branch. Abstract
    /// may-truthiness reaches both branches through the guard's own
    /// fan-out.
    If {
        guard: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    /// Sequential binding list, then the body.
    Let {
        bindings: Vec<BindingForm>,
        body: Box<Expr>,
    },
    /// Structural equality. In abstract mode a `may` comparison yields both
    /// booleans, each tagged `may`.
    Equal { lhs: Box<Expr>, rhs: Box<Expr> },
    /// Domain membership test on a map value.
    InDom { map: Box<Expr>, key: Box<Expr> },
    /// Membership test on a set value.
    InSet { set: Box<Expr>, elem: Box<Expr> },
    EmptySet,
    /// Union of the evaluated sets.
    SetUnion(Vec<Expr>),
    /// The evaluated set plus the evaluated elements.
    SetAdd { set: Box<Expr>, elems: Vec<Expr> },
    /// Invokes a meta-function on the instantiated argument pattern.
    MetaCall { name: Arc<str>, arg: Pattern },
    /// The inner expression must evaluate to a set; selects one element
    /// non-deterministically (one result per member).
    Choose(Box<Expr>),
    /// Allocates a fresh address in the tagged partition. Concrete
    /// allocation draws from the run's generator; abstract allocation is
    /// deterministic in (rule, site, hint) and bumps the address count.
    Alloc {
        space: Arc<str>,
        kind: AddrKind,
        hint: Option<Pattern>,
        site: u32,
    },
    /// Escape hatch: the whole store as a raw map-of-maps value.
    StoreSpaceRef,
    /// Escape hatch: one partition as a raw map value.
    StoreRef { space: Arc<str> },
}

impl Expr {
    pub fn term(pat: Pattern) -> Self {
        Self::Term(pat)
    }

    pub fn map_lookup(map: impl Into<Arc<str>>, key: Self) -> Self {
        Self::MapLookup {
            map: map.into(),
            key: Box::new(key),
            default: None,
        }
    }

    pub fn map_lookup_default(map: impl Into<Arc<str>>, key: Self, default: Self) -> Self {
        Self::MapLookup {
            map: map.into(),
            key: Box::new(key),
            default: Some(Box::new(default)),
        }
    }

    pub fn store_lookup(key: Self) -> Self {
        Self::StoreLookup { key: Box::new(key) }
    }

    pub fn equal(lhs: Self, rhs: Self) -> Self {
        Self::Equal {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn choose(inner: Self) -> Self {
        Self::Choose(Box::new(inner))
    }

    pub fn set_add(set: Self, elems: impl IntoIterator<Item = Self>) -> Self {
        Self::SetAdd {
            set: Box::new(set),
            elems: elems.into_iter().collect(),
        }
    }

    /// Egal allocation (`MAlloc`).
    pub fn malloc(space: impl Into<Arc<str>>) -> Self {
        Self::Alloc {
            space: space.into(),
            kind: AddrKind::Egal,
            hint: None,
            site: 0,
        }
    }

    /// Structural allocation (`SAlloc`).
    pub fn salloc(space: impl Into<Arc<str>>) -> Self {
        Self::Alloc {
            space: space.into(),
            kind: AddrKind::Structural,
            hint: None,
            site: 0,
        }
    }

    /// Egal allocation with a client hint for abstract naming (`QMAlloc`).
    pub fn qmalloc(space: impl Into<Arc<str>>, hint: Pattern) -> Self {
        Self::Alloc {
            space: space.into(),
            kind: AddrKind::Egal,
            hint: Some(hint),
            site: 0,
        }
    }

    /// Structural allocation with a client hint (`QSAlloc`).
    pub fn qsalloc(space: impl Into<Arc<str>>, hint: Pattern) -> Self {
        Self::Alloc {
            space: space.into(),
            kind: AddrKind::Structural,
            hint: Some(hint),
            site: 0,
        }
    }

    /// Assigns static site numbers to allocation forms, in traversal order.
    /// Run once at rule construction so abstract allocation is a pure
    /// function of (rule, site, hint).
    pub(crate) fn number_sites(&mut self, next: &mut u32) {
        match self {
            Self::Term(_) | Self::Bool(_) | Self::EmptySet | Self::MetaCall { .. } | Self::StoreSpaceRef | Self::StoreRef { .. } => {}
            Self::MapLookup { key, default, .. } => {
                key.number_sites(next);
                if let Some(def) = default {
                    def.number_sites(next);
                }
            }
            Self::MapExtend { map, key, value, .. } => {
                map.number_sites(next);
                key.number_sites(next);
                value.number_sites(next);
            }
            Self::StoreLookup { key } => key.number_sites(next),
            Self::If { guard, then, els } => {
                guard.number_sites(next);
                then.number_sites(next);
                els.number_sites(next);
            }
            Self::Let { bindings, body } => {
                for form in bindings {
                    form.number_sites(next);
                }
                body.number_sites(next);
            }
            Self::Equal { lhs, rhs } => {
                lhs.number_sites(next);
                rhs.number_sites(next);
            }
            Self::InDom { map, key } => {
                map.number_sites(next);
                key.number_sites(next);
            }
            Self::InSet { set, elem } => {
                set.number_sites(next);
                elem.number_sites(next);
            }
            Self::SetUnion(es) => {
                for e in es {
                    e.number_sites(next);
                }
            }
            Self::SetAdd { set, elems } => {
                set.number_sites(next);
                for e in elems {
                    e.number_sites(next);
                }
            }
            Self::Choose(inner) => inner.number_sites(next),
            Self::Alloc { site, .. } => {
                *site = *next;
                *next += 1;
            }
        }
    }

    /// The store-interaction classifier of this expression.
    pub fn interaction(&self) -> StoreInteraction {
        let read = StoreInteraction {
            read: true,
            ..StoreInteraction::PURE
        };
        match self {
            Self::Term(_) | Self::Bool(_) | Self::EmptySet => StoreInteraction::PURE,
            // Equality and lookups may dereference structural addresses.
            Self::MapLookup { key, default, .. } => {
                let mut i = key.interaction().union(read);
                if let Some(def) = default {
                    i = i.union(def.interaction());
                }
                i
            }
            Self::MapExtend { map, key, value, .. } => {
                map.interaction().union(key.interaction()).union(value.interaction()).union(read)
            }
            Self::StoreLookup { key } => {
                let mut i = key.interaction().union(read);
                i.many = true;
                i
            }
            Self::If { guard, then, els } => guard.interaction().union(then.interaction()).union(els.interaction()),
            Self::Let { bindings, body } => bindings
                .iter()
                .map(BindingForm::interaction)
                .fold(body.interaction(), StoreInteraction::union),
            Self::Equal { lhs, rhs } => lhs.interaction().union(rhs.interaction()).union(read),
            Self::InDom { map, key } => map.interaction().union(key.interaction()).union(read),
            Self::InSet { set, elem } => set.interaction().union(elem.interaction()).union(read),
            Self::SetUnion(es) => es.iter().map(Self::interaction).fold(StoreInteraction::PURE, StoreInteraction::union),
            Self::SetAdd { set, elems } => elems
                .iter()
                .map(Self::interaction)
                .fold(set.interaction(), StoreInteraction::union),
            // A meta-function body is opaque here; stay conservative.
            Self::MetaCall { .. } => StoreInteraction {
                read: true,
                write: true,
                cardinality: true,
                alloc: true,
                many: true,
            },
            Self::Choose(inner) => {
                let mut i = inner.interaction();
                i.many = true;
                i
            }
            Self::Alloc { .. } => StoreInteraction {
                alloc: true,
                cardinality: true,
                ..StoreInteraction::PURE
            },
            Self::StoreSpaceRef | Self::StoreRef { .. } => read,
        }
    }
}

/// The threaded effect state of one evaluation branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub store: Store,
    pub counts: Counts,
    pub quality: Quality,
}

impl Flow {
    /// A concrete branch: no counts, must-quality throughout.
    pub fn concrete(store: Store) -> Self {
        Self {
            store,
            counts: Counts::new(),
            quality: Quality::Must,
        }
    }

    pub fn abstracted(store: Store, counts: Counts) -> Self {
        Self {
            store,
            counts,
            quality: Quality::Must,
        }
    }

    /// Meets the branch quality with `q`.
    pub fn tag(mut self, q: Quality) -> Self {
        self.quality = self.quality.meet(q);
        self
    }
}

/// One element of an evaluation result set.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub value: DPattern,
    pub flow: Flow,
}

/// Everything evaluation needs besides the environment and flow.
#[derive(Debug)]
pub struct EvalCtx<'a, Tr: ReductionTracer> {
    pub lang: &'a Language,
    pub semantics: &'a Semantics,
    pub mode: Mode,
    /// Name of the rule (or meta-function rule) being applied; abstract
    /// allocation folds it into the address.
    pub rule: Arc<str>,
    pub r#gen: &'a mut AddrGen,
    pub tracer: &'a mut Tr,
}

/// Set-semantics insert for outcome sets. A duplicate keeps the best
/// quality: if any derivation is must, the result is must.
pub(crate) fn push_outcome(out: &mut Vec<EvalOutcome>, value: DPattern, flow: Flow) {
    for existing in out.iter_mut() {
        if existing.value == value && existing.flow.store == flow.store && existing.flow.counts == flow.counts {
            if flow.quality == Quality::Must {
                existing.flow.quality = Quality::Must;
            }
            return;
        }
    }
    out.push(EvalOutcome { value, flow });
}

fn push_branch(out: &mut Vec<(Env, Flow)>, env: Env, flow: Flow) {
    for (e, f) in out.iter_mut() {
        if *e == env && f.store == flow.store && f.counts == flow.counts {
            if flow.quality == Quality::Must {
                f.quality = Quality::Must;
            }
            return;
        }
    }
    out.push((env, flow));
}

/// Evaluates an expression to its result set.
pub fn eval<Tr: ReductionTracer>(
    ctx: &mut EvalCtx<'_, Tr>,
    expr: &Expr,
    env: &Env,
    flow: Flow,
) -> EngineResult<Vec<EvalOutcome>> {
    match expr {
        Expr::Term(pat) => {
            let value = pat.instantiate(env)?;
            Ok(vec![EvalOutcome { value, flow }])
        }
        Expr::Bool(b) => Ok(vec![EvalOutcome {
            value: DPattern::from(*b),
            flow,
        }]),
        Expr::MapLookup { map, key, default } => {
            let map_val = env
                .get(map)
                .ok_or_else(|| EngineError::eval(format!("unbound map variable `{map}`")))?
                .clone();
            let m = match map_val {
                DPattern::Map(m) => m,
                other => {
                    return Err(EngineError::with_value(
                        Stage::ExprEval,
                        format!("`{map}` is bound to a non-map"),
                        other,
                    ));
                }
            };
            let mut out = Vec::new();
            for EvalOutcome { value: k, flow } in eval(ctx, key, env, flow)? {
                eval_map_lookup(ctx, &m, k, default.as_deref(), env, flow, &mut out)?;
            }
            Ok(out)
        }
        Expr::MapExtend {
            map,
            key,
            value,
            trust_strong,
        } => {
            let mut out = Vec::new();
            for (vals, flow) in eval_seq(ctx, &[&**map, &**key, &**value], env, flow)? {
                let (m, k, v) = take3(vals);
                let mut mv = match m {
                    DPattern::Map(mv) => mv,
                    other => return Err(EngineError::with_value(Stage::ExprEval, "map-extend on a non-map", other)),
                };
                let weak = ctx.mode == Mode::Abstract
                    && !*trust_strong
                    && matches!(&k, DPattern::Addr(a) if flow.counts.get(a) == Cardinality::Many);
                if weak {
                    let joined = match mv.entries.get(&k) {
                        Some(old) => join_values(old.clone(), v),
                        None => v,
                    };
                    mv.entries.insert(k, joined);
                } else {
                    mv.entries.insert(k, v);
                }
                push_outcome(&mut out, DPattern::Map(mv), flow);
            }
            Ok(out)
        }
        Expr::StoreLookup { key } => {
            let mut out = Vec::new();
            for EvalOutcome { value: k, flow } in eval(ctx, key, env, flow)? {
                let DPattern::Addr(a) = &k else {
                    return Err(EngineError::with_value(
                        Stage::ExprEval,
                        "store-lookup key is not an address",
                        k,
                    ));
                };
                match ctx.mode {
                    Mode::Concrete => {
                        let v = flow.store.lookup_one(a)?.clone();
                        push_outcome(&mut out, v, flow);
                    }
                    Mode::Abstract => {
                        let entry = flow.store.lookup(a)?.clone();
                        let spread = entry.len() > 1 || flow.counts.get(a) == Cardinality::Many;
                        let q = if spread { Quality::May } else { Quality::Must };
                        for v in entry {
                            push_outcome(&mut out, v, flow.clone().tag(q));
                        }
                    }
                }
            }
            Ok(out)
        }
        Expr::If { guard, then, els } => {
            let mut out = Vec::new();
            for EvalOutcome { value: g, flow } in eval(ctx, guard, env, flow)? {
                let branch = if g.is_truthy() { then } else { els };
                for o in eval(ctx, branch, env, flow)? {
                    push_outcome(&mut out, o.value, o.flow);
                }
            }
            Ok(out)
        }
        Expr::Let { bindings, body } => {
            let mut out = Vec::new();
            for (env2, flow2) in eval_bindings(ctx, bindings, env, flow)? {
                for o in eval(ctx, body, &env2, flow2)? {
                    push_outcome(&mut out, o.value, o.flow);
                }
            }
            Ok(out)
        }
        Expr::Equal { lhs, rhs } => {
            let mut out = Vec::new();
            for (vals, flow) in eval_seq(ctx, &[&**lhs, &**rhs], env, flow)? {
                let (l, r) = take2(vals);
                match ctx.mode {
                    Mode::Concrete => {
                        let eq = values_equal(ctx.lang, &l, &r, &flow.store)?;
                        push_outcome(&mut out, DPattern::from(eq), flow);
                    }
                    Mode::Abstract => {
                        push_ternary(&mut out, values_equal_abs(ctx.lang, &l, &r, &flow.store, &flow.counts)?, flow);
                    }
                }
            }
            Ok(out)
        }
        Expr::InDom { map, key } => {
            let mut out = Vec::new();
            for (vals, flow) in eval_seq(ctx, &[&**map, &**key], env, flow)? {
                let (m, k) = take2(vals);
                let mv = match m {
                    DPattern::Map(mv) => mv,
                    other => return Err(EngineError::with_value(Stage::ExprEval, "in-dom on a non-map", other)),
                };
                match ctx.mode {
                    Mode::Concrete => {
                        let mut found = mv.entries.contains_key(&k);
                        if !found {
                            for k2 in mv.entries.keys() {
                                if values_equal(ctx.lang, &k, k2, &flow.store)? {
                                    found = true;
                                    break;
                                }
                            }
                        }
                        push_outcome(&mut out, DPattern::from(found), flow);
                    }
                    Mode::Abstract => {
                        let mut best = Ternary::MustFalse;
                        if mv.entries.contains_key(&k) {
                            best = Ternary::MustTrue;
                        } else {
                            for k2 in mv.entries.keys() {
                                match values_equal_abs(ctx.lang, &k, k2, &flow.store, &flow.counts)? {
                                    Ternary::MustTrue => {
                                        best = Ternary::MustTrue;
                                        break;
                                    }
                                    Ternary::May => best = Ternary::May,
                                    Ternary::MustFalse => {}
                                }
                            }
                        }
                        push_ternary(&mut out, best, flow);
                    }
                }
            }
            Ok(out)
        }
        Expr::InSet { set, elem } => {
            let mut out = Vec::new();
            for (vals, flow) in eval_seq(ctx, &[&**set, &**elem], env, flow)? {
                let (s, e) = take2(vals);
                let sv = match s {
                    DPattern::Set(sv) => sv,
                    other => return Err(EngineError::with_value(Stage::ExprEval, "in-set on a non-set", other)),
                };
                match ctx.mode {
                    Mode::Concrete => {
                        let mut found = sv.elems.contains(&e);
                        if !found {
                            for f in &sv.elems {
                                if values_equal(ctx.lang, &e, f, &flow.store)? {
                                    found = true;
                                    break;
                                }
                            }
                        }
                        push_outcome(&mut out, DPattern::from(found), flow);
                    }
                    Mode::Abstract => {
                        let mut best = Ternary::MustFalse;
                        if sv.elems.contains(&e) {
                            best = Ternary::MustTrue;
                        } else {
                            for f in &sv.elems {
                                match values_equal_abs(ctx.lang, &e, f, &flow.store, &flow.counts)? {
                                    Ternary::MustTrue => {
                                        best = Ternary::MustTrue;
                                        break;
                                    }
                                    Ternary::May => best = Ternary::May,
                                    Ternary::MustFalse => {}
                                }
                            }
                        }
                        push_ternary(&mut out, best, flow);
                    }
                }
            }
            Ok(out)
        }
        Expr::EmptySet => Ok(vec![EvalOutcome {
            value: DPattern::Set(SetValue::new()),
            flow,
        }]),
        Expr::SetUnion(es) => {
            let refs: Vec<&Expr> = es.iter().collect();
            let mut out = Vec::new();
            for (vals, flow) in eval_seq(ctx, &refs, env, flow)? {
                let mut acc = SetValue::new();
                for v in vals {
                    match v {
                        DPattern::Set(s) => acc.elems.extend(s.elems),
                        other => {
                            return Err(EngineError::with_value(Stage::ExprEval, "set-union on a non-set", other));
                        }
                    }
                }
                push_outcome(&mut out, DPattern::Set(acc), flow);
            }
            Ok(out)
        }
        Expr::SetAdd { set, elems } => {
            let mut refs: Vec<&Expr> = vec![&**set];
            refs.extend(elems.iter());
            let mut out = Vec::new();
            for (vals, flow) in eval_seq(ctx, &refs, env, flow)? {
                let mut it = vals.into_iter();
                let Some(base) = it.next() else {
                    unreachable!("set-add sequence is never empty")
                };
                let mut s = match base {
                    DPattern::Set(s) => s,
                    other => return Err(EngineError::with_value(Stage::ExprEval, "set-add on a non-set", other)),
                };
                s.elems.extend(it);
                push_outcome(&mut out, DPattern::Set(s), flow);
            }
            Ok(out)
        }
        Expr::MetaCall { name, arg } => {
            let arg_val = arg.instantiate(env)?;
            let semantics = ctx.semantics;
            let mf = semantics.metafunction(name).ok_or_else(|| {
                EngineError::new(Stage::MfEval, format!("unknown meta-function `{name}`"))
            })?;
            ctx.tracer.mf_called(name);
            crate::rules::apply_metafunction(ctx, mf, arg_val, flow)
        }
        Expr::Choose(inner) => {
            let mut out = Vec::new();
            for EvalOutcome { value: s, flow } in eval(ctx, inner, env, flow)? {
                let set = match s {
                    DPattern::Set(set) => set,
                    other => return Err(EngineError::with_value(Stage::ExprEval, "choose on a non-set", other)),
                };
                let q = if ctx.mode == Mode::Abstract && set.elems.len() > 1 {
                    Quality::May
                } else {
                    Quality::Must
                };
                for e in set.elems {
                    push_outcome(&mut out, e, flow.clone().tag(q));
                }
            }
            Ok(out)
        }
        Expr::Alloc { space, kind, hint, site } => {
            let name = match ctx.mode {
                Mode::Concrete => ctx.r#gen.fresh(),
                Mode::Abstract => {
                    let hint_val = match hint {
                        Some(p) => Some(Box::new(p.instantiate(env)?)),
                        None => None,
                    };
                    AddrName::Site {
                        rule: ctx.rule.clone(),
                        site: *site,
                        hint: hint_val,
                    }
                }
            };
            let addr = Address {
                kind: *kind,
                space: space.clone(),
                name,
            };
            let mut flow = flow;
            if ctx.mode == Mode::Abstract {
                flow.counts.bump(&addr);
            }
            ctx.tracer.alloc(&addr);
            Ok(vec![EvalOutcome {
                value: DPattern::Addr(addr),
                flow,
            }])
        }
        Expr::StoreSpaceRef => {
            let mut outer = MapValue::new(MapKind::Raw);
            for (tag, part) in flow.store.partitions() {
                outer.entries.insert(
                    DPattern::symbol(tag.clone()),
                    DPattern::Map(partition_to_map(tag, part)),
                );
            }
            Ok(vec![EvalOutcome {
                value: DPattern::Map(outer),
                flow,
            }])
        }
        Expr::StoreRef { space } => {
            let value = match flow.store.partition(space) {
                Some(part) => DPattern::Map(partition_to_map(space, part)),
                None => DPattern::Map(MapValue::new(MapKind::Raw)),
            };
            Ok(vec![EvalOutcome { value, flow }])
        }
    }
}

/// Evaluates a binding list left to right, threading effects, and returns
/// the surviving `(environment, flow)` branches.
pub fn eval_bindings<Tr: ReductionTracer>(
    ctx: &mut EvalCtx<'_, Tr>,
    bindings: &[BindingForm],
    env: &Env,
    flow: Flow,
) -> EngineResult<Vec<(Env, Flow)>> {
    let mut frontier = vec![(env.clone(), flow)];
    for form in bindings {
        let mut next: Vec<(Env, Flow)> = Vec::new();
        for (e, f) in frontier {
            match form {
                BindingForm::Bind { pat, expr } => {
                    for EvalOutcome { value, flow: f2 } in eval(ctx, expr, &e, f.clone())? {
                        match ctx.mode {
                            Mode::Concrete => {
                                if let Some(e2) = match_concrete(ctx.lang, pat, &value, &e, &f2.store)? {
                                    push_branch(&mut next, e2, f2.clone());
                                }
                            }
                            Mode::Abstract => {
                                for (e2, q) in
                                    match_abstract(ctx.lang, pat, &value, &e, &f2.store, &f2.counts)?
                                {
                                    push_branch(&mut next, e2, f2.clone().tag(q));
                                }
                            }
                        }
                    }
                }
                BindingForm::StoreExtend {
                    key,
                    value,
                    trust_strong,
                } => {
                    for (vals, mut f2) in eval_seq(ctx, &[key, value], &e, f.clone())? {
                        let (k, v) = take2(vals);
                        let a = match k {
                            DPattern::Addr(a) => a,
                            other => {
                                return Err(EngineError::with_value(
                                    Stage::ExprEval,
                                    "store-extend key is not an address",
                                    other,
                                ));
                            }
                        };
                        let strong = match ctx.mode {
                            Mode::Concrete => true,
                            Mode::Abstract => *trust_strong || f2.counts.get(&a) <= Cardinality::One,
                        };
                        if strong {
                            f2.store.write_strong(&a, v);
                        } else {
                            f2.store.write_weak(&a, v);
                        }
                        ctx.tracer.store_write(&a, strong);
                        push_branch(&mut next, e.clone(), f2);
                    }
                }
                BindingForm::When(expr) => {
                    for EvalOutcome { value, flow: f2 } in eval(ctx, expr, &e, f.clone())? {
                        if value.is_truthy() {
                            push_branch(&mut next, e.clone(), f2);
                        }
                    }
                }
            }
        }
        if next.is_empty() {
            return Ok(next);
        }
        frontier = next;
    }
    Ok(frontier)
}

/// Left-to-right evaluation of a fixed sequence, threading each
/// sub-result's flow into the next sub-expression (cartesian fan-out).
fn eval_seq<Tr: ReductionTracer>(
    ctx: &mut EvalCtx<'_, Tr>,
    exprs: &[&Expr],
    env: &Env,
    flow: Flow,
) -> EngineResult<Vec<(Vec<DPattern>, Flow)>> {
    let mut frontier: Vec<(Vec<DPattern>, Flow)> = vec![(Vec::new(), flow)];
    for expr in exprs {
        let mut next = Vec::new();
        for (vals, f) in frontier {
            for EvalOutcome { value, flow: f2 } in eval(ctx, expr, env, f.clone())? {
                let mut vals2 = vals.clone();
                vals2.push(value);
                next.push((vals2, f2));
            }
        }
        frontier = next;
    }
    Ok(frontier)
}

fn eval_map_lookup<Tr: ReductionTracer>(
    ctx: &mut EvalCtx<'_, Tr>,
    map: &MapValue,
    key: DPattern,
    default: Option<&Expr>,
    env: &Env,
    flow: Flow,
    out: &mut Vec<EvalOutcome>,
) -> EngineResult<()> {
    match ctx.mode {
        Mode::Concrete => {
            let mut hit = map.entries.get(&key).cloned();
            if hit.is_none() {
                for (k2, v) in &map.entries {
                    if values_equal(ctx.lang, &key, k2, &flow.store)? {
                        hit = Some(v.clone());
                        break;
                    }
                }
            }
            match hit {
                Some(v) => push_outcome(out, v, flow),
                None => match default {
                    Some(def) => {
                        for o in eval(ctx, def, env, flow)? {
                            push_outcome(out, o.value, o.flow);
                        }
                    }
                    None => {
                        return Err(EngineError::with_value(
                            Stage::ExprEval,
                            "map-lookup missed and no default was given",
                            key,
                        ));
                    }
                },
            }
        }
        Mode::Abstract => {
            let mut hits: Vec<(DPattern, Quality)> = Vec::new();
            let mut must_hit = false;
            if let Some(v) = map.entries.get(&key) {
                hits.push((v.clone(), Quality::Must));
                must_hit = true;
            } else {
                for (k2, v) in &map.entries {
                    match values_equal_abs(ctx.lang, &key, k2, &flow.store, &flow.counts)? {
                        Ternary::MustTrue => {
                            hits.push((v.clone(), Quality::Must));
                            must_hit = true;
                        }
                        Ternary::May => hits.push((v.clone(), Quality::May)),
                        Ternary::MustFalse => {}
                    }
                }
            }
            let any_hit = !hits.is_empty();
            for (v, q) in hits {
                push_outcome(out, v, flow.clone().tag(q));
            }
            if !must_hit {
                match default {
                    Some(def) => {
                        // Absence is possible; the default branch is only a
                        // may-result when some entry may match too.
                        let q = if any_hit { Quality::May } else { Quality::Must };
                        for o in eval(ctx, def, env, flow)? {
                            push_outcome(out, o.value, o.flow.tag(q));
                        }
                    }
                    None if !any_hit => {
                        return Err(EngineError::with_value(
                            Stage::ExprEval,
                            "map-lookup missed and no default was given",
                            key,
                        ));
                    }
                    None => {}
                }
            }
        }
    }
    Ok(())
}

fn push_ternary(out: &mut Vec<EvalOutcome>, t: Ternary, flow: Flow) {
    match t {
        Ternary::MustTrue => push_outcome(out, DPattern::from(true), flow),
        Ternary::MustFalse => push_outcome(out, DPattern::from(false), flow),
        Ternary::May => {
            push_outcome(out, DPattern::from(true), flow.clone().tag(Quality::May));
            push_outcome(out, DPattern::from(false), flow.tag(Quality::May));
        }
    }
}

/// Joins a new value into an existing map range entry (weak map update).
fn join_values(old: DPattern, new: DPattern) -> DPattern {
    if old == new {
        return old;
    }
    match old {
        DPattern::Set(mut s) => {
            s.elems.insert(new);
            DPattern::Set(s)
        }
        other => DPattern::Set(SetValue::from_elems([other, new])),
    }
}

fn partition_to_map(tag: &Arc<str>, part: &IndexMap<AddrName, IndexSet<DPattern>>) -> MapValue {
    let mut m = MapValue::new(MapKind::Raw);
    for (name, vals) in part {
        let key = DPattern::Addr(Address::egal(tag.clone(), name.clone()));
        let value = if vals.len() == 1 {
            vals.iter()
                .next()
                .cloned()
                .unwrap_or_else(|| unreachable!("store entries are never empty"))
        } else {
            DPattern::Set(SetValue::from_elems(vals.iter().cloned()))
        };
        m.entries.insert(key, value);
    }
    m
}

fn take2(vals: Vec<DPattern>) -> (DPattern, DPattern) {
    let mut it = vals.into_iter();
    match (it.next(), it.next()) {
        (Some(a), Some(b)) => (a, b),
        _ => unreachable!("evaluated sequence has fixed arity"),
    }
}

fn take3(vals: Vec<DPattern>) -> (DPattern, DPattern, DPattern) {
    let mut it = vals.into_iter();
    match (it.next(), it.next(), it.next()) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => unreachable!("evaluated sequence has fixed arity"),
    }
}

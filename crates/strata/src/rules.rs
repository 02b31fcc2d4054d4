//! Rules, reduction relations, and meta-functions.
//!
//! A [`Rule`] rewrites a state: match the left-hand side against the term,
//! run the binding list (side conditions and store effects), and
//! instantiate the right-hand side under each surviving environment. The
//! [`Machine`] drives a whole [`Semantics`]: `apply` is the union over
//! rules, `apply_star` iterates to a normal form under a budget, and
//! `apply_star_memo` tracks visited states for a complete exploration
//! without revisits.
//!
//! Errors from rule evaluation abort the surrounding `apply`; they are not
//! caught to continue with the next rule.

use std::{fmt, sync::Arc};

use ahash::{AHashMap, AHashSet};

use crate::{
    error::{EngineError, EngineResult, Stage},
    expr::{BindingForm, EvalCtx, EvalOutcome, Flow, Mode, eval_bindings, push_outcome},
    limits::Limits,
    pattern::{Env, Pattern, Quality, match_abstract, match_concrete},
    space::Language,
    store::{AddrGen, Counts, Store},
    tracer::{NoopTracer, ReductionTracer},
    value::DPattern,
};

/// One row of a reduction relation.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: Arc<str>,
    pub lhs: Pattern,
    pub rhs: Pattern,
    pub bindings: Vec<BindingForm>,
}

impl Rule {
    /// Builds a rule and numbers its allocation sites, making abstract
    /// allocation a pure function of (rule, site, hint).
    pub fn new(
        name: impl Into<Arc<str>>,
        lhs: Pattern,
        rhs: Pattern,
        bindings: impl IntoIterator<Item = BindingForm>,
    ) -> Self {
        let mut bindings: Vec<BindingForm> = bindings.into_iter().collect();
        let mut next = 0u32;
        for form in &mut bindings {
            form.number_sites(&mut next);
        }
        Self {
            name: name.into(),
            lhs,
            rhs,
            bindings,
        }
    }
}

/// A concrete state: a term paired with a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct State {
    pub term: DPattern,
    pub store: Store,
}

impl State {
    pub fn new(term: DPattern) -> Self {
        Self {
            term,
            store: Store::new(),
        }
    }

    pub fn with_store(term: DPattern, store: Store) -> Self {
        Self { term, store }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({term}, {store})", term = self.term, store = self.store)
    }
}

/// An abstract state: a concrete state plus per-address cardinality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbsState {
    pub term: DPattern,
    pub store: Store,
    pub counts: Counts,
}

impl AbsState {
    pub fn new(term: DPattern) -> Self {
        Self {
            term,
            store: Store::new(),
            counts: Counts::new(),
        }
    }
}

/// Trusted concrete implementation of a meta-function: receives the store
/// and the instantiated argument, returns the result set.
pub type TrustedConcrete = Arc<dyn Fn(&Language, &Store, &DPattern) -> EngineResult<Vec<(DPattern, Store)>>>;

/// Trusted abstract implementation: additionally receives and returns
/// counts, and tags each result with a quality.
pub type TrustedAbstract =
    Arc<dyn Fn(&Language, &Store, &Counts, &DPattern) -> EngineResult<Vec<(DPattern, Store, Counts, Quality)>>>;

/// A named, rule-defined function callable from expressions, optionally
/// short-circuited by trusted implementations.
#[derive(Clone)]
pub struct MetaFunction {
    pub name: Arc<str>,
    pub rules: Vec<Rule>,
    pub trusted_concrete: Option<TrustedConcrete>,
    pub trusted_abstract: Option<TrustedAbstract>,
}

impl MetaFunction {
    pub fn from_rules(name: impl Into<Arc<str>>, rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            name: name.into(),
            rules: rules.into_iter().collect(),
            trusted_concrete: None,
            trusted_abstract: None,
        }
    }

    pub fn with_trusted_concrete(mut self, f: TrustedConcrete) -> Self {
        self.trusted_concrete = Some(f);
        self
    }

    pub fn with_trusted_abstract(mut self, f: TrustedAbstract) -> Self {
        self.trusted_abstract = Some(f);
        self
    }
}

impl fmt::Debug for MetaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaFunction")
            .field("name", &self.name)
            .field("rules", &self.rules.len())
            .field("trusted_concrete", &self.trusted_concrete.is_some())
            .field("trusted_abstract", &self.trusted_abstract.is_some())
            .finish()
    }
}

/// A rule list plus a meta-function table: everything the machine needs
/// besides the language itself.
#[derive(Debug, Clone, Default)]
pub struct Semantics {
    rules: Vec<Rule>,
    metafunctions: AHashMap<Arc<str>, MetaFunction>,
}

impl Semantics {
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            metafunctions: AHashMap::new(),
        }
    }

    pub fn with_metafunction(mut self, mf: MetaFunction) -> Self {
        self.metafunctions.insert(mf.name.clone(), mf);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn metafunction(&self, name: &str) -> Option<&MetaFunction> {
        self.metafunctions.get(name)
    }
}

/// Drives a semantics over states: one interpreter instance, one mode, one
/// address generator.
pub struct Machine<'a, Tr: ReductionTracer = NoopTracer> {
    lang: &'a Language,
    semantics: &'a Semantics,
    mode: Mode,
    r#gen: AddrGen,
    tracer: Tr,
}

impl<'a> Machine<'a, NoopTracer> {
    /// A concrete interpreter with no tracing.
    pub fn concrete(lang: &'a Language, semantics: &'a Semantics) -> Self {
        Self::with_tracer(lang, semantics, Mode::Concrete, NoopTracer)
    }

    /// An abstract interpreter with no tracing.
    pub fn abstracted(lang: &'a Language, semantics: &'a Semantics) -> Self {
        Self::with_tracer(lang, semantics, Mode::Abstract, NoopTracer)
    }
}

impl<'a, Tr: ReductionTracer> Machine<'a, Tr> {
    pub fn with_tracer(lang: &'a Language, semantics: &'a Semantics, mode: Mode, tracer: Tr) -> Self {
        Self {
            lang,
            semantics,
            mode,
            r#gen: AddrGen::new(),
            tracer,
        }
    }

    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Applies one rule to a term under a flow: match, bindings, RHS.
    fn apply_rule_flow(&mut self, rule: &Rule, term: &DPattern, flow: Flow) -> EngineResult<Vec<(DPattern, Flow)>> {
        let envs: Vec<(Env, Quality)> = match self.mode {
            Mode::Concrete => match_concrete(self.lang, &rule.lhs, term, &Env::new(), &flow.store)?
                .map(|e| vec![(e, Quality::Must)])
                .unwrap_or_default(),
            Mode::Abstract => match_abstract(self.lang, &rule.lhs, term, &Env::new(), &flow.store, &flow.counts)?,
        };
        let mut out: Vec<(DPattern, Flow)> = Vec::new();
        for (env, q) in envs {
            let mut ctx = EvalCtx {
                lang: self.lang,
                semantics: self.semantics,
                mode: self.mode,
                rule: rule.name.clone(),
                r#gen: &mut self.r#gen,
                tracer: &mut self.tracer,
            };
            for (env2, flow2) in eval_bindings(&mut ctx, &rule.bindings, &env, flow.clone().tag(q))? {
                let term2 = rule.rhs.instantiate(&env2)?;
                let mut dup = false;
                for (t, f) in &mut out {
                    if *t == term2 && f.store == flow2.store && f.counts == flow2.counts {
                        if flow2.quality == Quality::Must {
                            f.quality = Quality::Must;
                        }
                        dup = true;
                        break;
                    }
                }
                if !dup {
                    out.push((term2, flow2));
                }
            }
        }
        if !out.is_empty() {
            self.tracer.rule_fired(&rule.name, out.len());
        }
        Ok(out)
    }

    /// Applies one rule to a concrete state.
    pub fn apply_rule(&mut self, rule: &Rule, state: &State) -> EngineResult<Vec<State>> {
        let results = self.apply_rule_flow(rule, &state.term, Flow::concrete(state.store.clone()))?;
        Ok(results
            .into_iter()
            .map(|(term, flow)| State {
                term,
                store: flow.store,
            })
            .collect())
    }

    /// Union over all rules of their applications to a concrete state.
    pub fn apply(&mut self, state: &State) -> EngineResult<Vec<State>> {
        let semantics = self.semantics;
        let mut out: Vec<State> = Vec::new();
        for rule in semantics.rules() {
            for (term, flow) in self.apply_rule_flow(rule, &state.term, Flow::concrete(state.store.clone()))? {
                let next = State {
                    term,
                    store: flow.store,
                };
                if !out.contains(&next) {
                    out.push(next);
                }
            }
        }
        Ok(out)
    }

    /// Iterates `apply` until every branch reaches a state with an empty
    /// image (a normal form). Without revisit tracking a cyclic reduction
    /// diverges; the step budget turns that into a `Stage::Limit` error.
    pub fn apply_star(&mut self, state: State, limits: Limits) -> EngineResult<Vec<State>> {
        let mut frontier = vec![state];
        let mut normal: Vec<State> = Vec::new();
        let mut steps = 0usize;
        while let Some(s) = frontier.pop() {
            steps += 1;
            limits.check_steps(steps)?;
            let successors = self.apply(&s)?;
            if successors.is_empty() {
                if !normal.contains(&s) {
                    normal.push(s);
                }
            } else {
                frontier.extend(successors);
            }
            self.tracer.step(steps, frontier.len());
        }
        Ok(normal)
    }

    /// Memoizing transitive closure: tracks visited states (hashed by value
    /// equality over term and store) and yields each normal form exactly
    /// once. Revisits contribute nothing, so cyclic reductions terminate.
    pub fn apply_star_memo(&mut self, state: State, limits: Limits) -> EngineResult<Vec<State>> {
        let mut visited: AHashSet<State> = AHashSet::new();
        let mut frontier = vec![state];
        let mut normal: Vec<State> = Vec::new();
        let mut steps = 0usize;
        while let Some(s) = frontier.pop() {
            if !visited.insert(s.clone()) {
                continue;
            }
            steps += 1;
            limits.check_steps(steps)?;
            limits.check_states(visited.len())?;
            let successors = self.apply(&s)?;
            if successors.is_empty() {
                if !normal.contains(&s) {
                    normal.push(s);
                }
            } else {
                frontier.extend(successors);
            }
            self.tracer.step(steps, frontier.len());
        }
        Ok(normal)
    }

    /// Applies one rule to an abstract state.
    pub fn apply_rule_abs(&mut self, rule: &Rule, state: &AbsState) -> EngineResult<Vec<(AbsState, Quality)>> {
        let flow = Flow::abstracted(state.store.clone(), state.counts.clone());
        let results = self.apply_rule_flow(rule, &state.term, flow)?;
        Ok(results
            .into_iter()
            .map(|(term, flow)| {
                (
                    AbsState {
                        term,
                        store: flow.store,
                        counts: flow.counts,
                    },
                    flow.quality,
                )
            })
            .collect())
    }

    /// Union over all rules of their applications to an abstract state.
    pub fn apply_abs(&mut self, state: &AbsState) -> EngineResult<Vec<(AbsState, Quality)>> {
        let semantics = self.semantics;
        let mut out: Vec<(AbsState, Quality)> = Vec::new();
        for rule in semantics.rules() {
            for (next, q) in self.apply_rule_abs(rule, state)? {
                let mut dup = false;
                for (s, existing_q) in &mut out {
                    if *s == next {
                        if q == Quality::Must {
                            *existing_q = Quality::Must;
                        }
                        dup = true;
                        break;
                    }
                }
                if !dup {
                    out.push((next, q));
                }
            }
        }
        Ok(out)
    }

    /// Complete abstract exploration: every state reachable from `state`,
    /// memoized, budget-bounded. The result includes `state` itself.
    pub fn apply_star_memo_abs(&mut self, state: AbsState, limits: Limits) -> EngineResult<Vec<AbsState>> {
        let mut visited: AHashSet<AbsState> = AHashSet::new();
        let mut order: Vec<AbsState> = Vec::new();
        let mut frontier = vec![state];
        let mut steps = 0usize;
        while let Some(s) = frontier.pop() {
            if !visited.insert(s.clone()) {
                continue;
            }
            order.push(s.clone());
            steps += 1;
            limits.check_steps(steps)?;
            limits.check_states(visited.len())?;
            for (next, _) in self.apply_abs(&s)? {
                frontier.push(next);
            }
            self.tracer.step(steps, frontier.len());
        }
        Ok(order)
    }
}

impl<Tr: ReductionTracer> fmt::Debug for Machine<'_, Tr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("language", &self.lang.name())
            .field("mode", &self.mode)
            .field("rules", &self.semantics.rules().len())
            .finish_non_exhaustive()
    }
}

/// Dispatches a meta-function call: trusted implementation if present,
/// otherwise the first rule whose LHS matches and yields results. A call
/// with no applicable rule produces the empty set, pruning the branch the
/// same way a failed match does.
pub(crate) fn apply_metafunction<Tr: ReductionTracer>(
    ctx: &mut EvalCtx<'_, Tr>,
    mf: &MetaFunction,
    arg: DPattern,
    flow: Flow,
) -> EngineResult<Vec<EvalOutcome>> {
    match ctx.mode {
        Mode::Concrete => {
            if let Some(f) = &mf.trusted_concrete {
                let results = f(ctx.lang, &flow.store, &arg)?;
                return Ok(results
                    .into_iter()
                    .map(|(value, store)| EvalOutcome {
                        value,
                        flow: Flow {
                            store,
                            counts: flow.counts.clone(),
                            quality: flow.quality,
                        },
                    })
                    .collect());
            }
        }
        Mode::Abstract => {
            if let Some(f) = &mf.trusted_abstract {
                let results = f(ctx.lang, &flow.store, &flow.counts, &arg)?;
                return Ok(results
                    .into_iter()
                    .map(|(value, store, counts, q)| EvalOutcome {
                        value,
                        flow: Flow {
                            store,
                            counts,
                            quality: flow.quality.meet(q),
                        },
                    })
                    .collect());
            }
        }
    }
    for rule in &mf.rules {
        let envs: Vec<(Env, Quality)> = match ctx.mode {
            Mode::Concrete => match_concrete(ctx.lang, &rule.lhs, &arg, &Env::new(), &flow.store)?
                .map(|e| vec![(e, Quality::Must)])
                .unwrap_or_default(),
            Mode::Abstract => match_abstract(ctx.lang, &rule.lhs, &arg, &Env::new(), &flow.store, &flow.counts)?,
        };
        if envs.is_empty() {
            continue;
        }
        let saved = std::mem::replace(&mut ctx.rule, rule.name.clone());
        let mut out = Vec::new();
        let mut failure = None;
        for (env, q) in envs {
            match run_mf_rule(ctx, rule, &env, flow.clone().tag(q), &mut out) {
                Ok(()) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        ctx.rule = saved;
        if let Some(e) = failure {
            return Err(e);
        }
        if !out.is_empty() {
            return Ok(out);
        }
    }
    Ok(vec![])
}

fn run_mf_rule<Tr: ReductionTracer>(
    ctx: &mut EvalCtx<'_, Tr>,
    rule: &Rule,
    env: &Env,
    flow: Flow,
    out: &mut Vec<EvalOutcome>,
) -> EngineResult<()> {
    for (env2, flow2) in eval_bindings(ctx, &rule.bindings, env, flow)? {
        let value = rule
            .rhs
            .instantiate(&env2)
            .map_err(|e| EngineError::new(Stage::MfEval, e.message))?;
        push_outcome(out, value, flow2);
    }
    Ok(())
}

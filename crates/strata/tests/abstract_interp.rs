//! Abstract interpreter scenarios: cardinality-driven weak updates, quality
//! collapse, abstract exploration, and soundness spot-checks against the
//! concrete interpreter.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use strata::{
    AbsState, AddrGen, Alternative, BindingForm, Cardinality, Component, DPattern, Env, EvalCtx, Expr, Flow,
    Language, Limits, Machine, Mode, NoopTracer, Pattern, Quality, Rule, Semantics, Space, State, Store, Variant,
    eval, parse_term,
};

fn box_language() -> Language {
    let boxed = Variant::new("Box", [Component::Anything]);
    Language::new(
        "box",
        [
            (Arc::from("B"), Space::user([Alternative::Variant(boxed)])),
            (Arc::from("Heap"), Space::address("A")),
        ],
    )
    .unwrap()
}

fn box_rule(lang: &Language) -> Rule {
    let boxed = lang.variant("Box").unwrap().clone();
    Rule::new(
        "box",
        Pattern::variant(boxed, [Pattern::bind("v")]),
        Pattern::reference("a"),
        [
            BindingForm::Bind {
                pat: Pattern::bind("a"),
                expr: Expr::malloc("A"),
            },
            BindingForm::StoreExtend {
                key: Expr::term(Pattern::reference("a")),
                value: Expr::term(Pattern::reference("v")),
                trust_strong: false,
            },
        ],
    )
}

// =============================================================================
// 1. Cardinality and weak updates (S6)
// =============================================================================

/// S6: the first firing leaves the site at count 1 (strong update); the
/// second saturates it to ω, and the write joins with the prior contents,
/// so a read sees both written values.
#[test]
fn repeated_abstract_allocation_saturates_and_joins() {
    let lang = box_language();
    let rule = box_rule(&lang);
    let semantics = Semantics::new([rule.clone()]);
    let mut machine = Machine::abstracted(&lang, &semantics);

    let first = machine
        .apply_rule_abs(&rule, &AbsState::new(parse_term(&lang, "B", "(Box 1)").unwrap()))
        .unwrap();
    assert_eq!(first.len(), 1);
    let (after_one, q1) = &first[0];
    assert_eq!(*q1, Quality::Must);
    let DPattern::Addr(addr) = &after_one.term else {
        panic!("rule should reduce to an address, got {t}", t = after_one.term);
    };
    assert_eq!(after_one.counts.get(addr), Cardinality::One);
    assert_eq!(after_one.store.lookup(addr).unwrap().len(), 1, "count-1 write is strong");

    let second_start = AbsState {
        term: parse_term(&lang, "B", "(Box 2)").unwrap(),
        store: after_one.store.clone(),
        counts: after_one.counts.clone(),
    };
    let second = machine.apply_rule_abs(&rule, &second_start).unwrap();
    assert_eq!(second.len(), 1);
    let (after_two, _) = &second[0];
    assert_eq!(after_two.counts.get(addr), Cardinality::Many, "re-allocation saturates the site");

    let entry = after_two.store.lookup(addr).unwrap();
    assert_eq!(entry.len(), 2, "the ω write joins: {entry:?}");
    assert!(entry.contains(&DPattern::number(1)) && entry.contains(&DPattern::number(2)));
}

/// `trust_strong` overrides saturation: the write overwrites even at ω.
#[test]
fn trust_strong_overrides_saturation() {
    let lang = box_language();
    let boxed = lang.variant("Box").unwrap().clone();
    let rule = Rule::new(
        "box",
        Pattern::variant(boxed, [Pattern::bind("v")]),
        Pattern::reference("a"),
        [
            BindingForm::Bind {
                pat: Pattern::bind("a"),
                expr: Expr::malloc("A"),
            },
            BindingForm::StoreExtend {
                key: Expr::term(Pattern::reference("a")),
                value: Expr::term(Pattern::reference("v")),
                trust_strong: true,
            },
        ],
    );
    let semantics = Semantics::new([rule.clone()]);
    let mut machine = Machine::abstracted(&lang, &semantics);

    let first = machine
        .apply_rule_abs(&rule, &AbsState::new(parse_term(&lang, "B", "(Box 1)").unwrap()))
        .unwrap();
    let (after_one, _) = &first[0];
    let second_start = AbsState {
        term: parse_term(&lang, "B", "(Box 2)").unwrap(),
        store: after_one.store.clone(),
        counts: after_one.counts.clone(),
    };
    let second = machine.apply_rule_abs(&rule, &second_start).unwrap();
    let (after_two, _) = &second[0];
    let DPattern::Addr(addr) = &after_two.term else {
        panic!("expected an address");
    };
    assert_eq!(
        after_two.store.lookup(addr).unwrap().len(),
        1,
        "a trusted-strong write overwrites even a saturated address"
    );
}

// =============================================================================
// 2. Quality collapse and may-truthiness
// =============================================================================

/// An equality over a joined structural address is `may`, so both booleans
/// come back tagged `may`, and `If` explores both branches.
#[test]
fn may_equality_explores_both_branches() {
    let lang = box_language();
    let semantics = Semantics::new([]);
    let mut store = Store::new();
    let addr = strata::Address::structural("A", strata::AddrName::Fresh(0));
    store.write_weak(&addr, DPattern::number(1));
    store.write_weak(&addr, DPattern::number(2));
    let env = Env::new().bind(Arc::from("p"), DPattern::Addr(addr));

    let guard = Expr::equal(Expr::term(Pattern::reference("p")), Expr::term(Pattern::number(1)));
    let expr = Expr::If {
        guard: Box::new(guard),
        then: Box::new(Expr::term(Pattern::symbol("yes"))),
        els: Box::new(Expr::term(Pattern::symbol("no"))),
    };

    let mut r#gen = AddrGen::new();
    let mut tracer = NoopTracer;
    let mut ctx = EvalCtx {
        lang: &lang,
        semantics: &semantics,
        mode: Mode::Abstract,
        rule: Arc::from("test"),
        r#gen: &mut r#gen,
        tracer: &mut tracer,
    };
    let outcomes = eval(&mut ctx, &expr, &env, Flow::abstracted(store, strata::Counts::new())).unwrap();
    let mut values: Vec<String> = outcomes.iter().map(|o| o.value.to_string()).collect();
    values.sort();
    assert_eq!(values, vec!["no", "yes"], "may-truthiness reaches both branches");
    assert!(
        outcomes.iter().all(|o| o.flow.quality == Quality::May),
        "every result downstream of a may comparison is may"
    );
}

/// Abstract store lookups fan out over the join set, tagged `may`.
#[test]
fn abstract_store_lookup_fans_out() {
    let lang = box_language();
    let semantics = Semantics::new([]);
    let mut store = Store::new();
    let addr = strata::Address::structural("A", strata::AddrName::Fresh(0));
    store.write_weak(&addr, DPattern::number(1));
    store.write_weak(&addr, DPattern::number(2));
    let env = Env::new().bind(Arc::from("p"), DPattern::Addr(addr));

    let mut r#gen = AddrGen::new();
    let mut tracer = NoopTracer;
    let mut ctx = EvalCtx {
        lang: &lang,
        semantics: &semantics,
        mode: Mode::Abstract,
        rule: Arc::from("test"),
        r#gen: &mut r#gen,
        tracer: &mut tracer,
    };
    let expr = Expr::store_lookup(Expr::term(Pattern::reference("p")));
    let outcomes = eval(&mut ctx, &expr, &env, Flow::abstracted(store, strata::Counts::new())).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.flow.quality == Quality::May));
}

// =============================================================================
// 3. Abstract exploration and soundness
// =============================================================================

/// The abstract exploration of a cyclic system terminates and covers every
/// reachable state.
#[test]
fn abstract_exploration_terminates() {
    let lang = Language::new("ints", []).unwrap();
    let rules = [
        Rule::new("zero-to-one", Pattern::number(0), Pattern::number(1), []),
        Rule::new("one-to-zero", Pattern::number(1), Pattern::number(0), []),
    ];
    let semantics = Semantics::new(rules);
    let mut machine = Machine::abstracted(&lang, &semantics);

    let visited = machine
        .apply_star_memo_abs(AbsState::new(DPattern::number(0)), Limits::unbounded())
        .unwrap();
    assert_eq!(visited.len(), 2, "both states of the two-cycle are visited once");
}

/// Soundness spot-check: the value the concrete run stores is contained in
/// the abstract run's join set for the corresponding allocation site.
#[test]
fn abstract_store_covers_concrete_store() {
    let lang = box_language();
    let rule = box_rule(&lang);
    let semantics = Semantics::new([rule.clone()]);

    let term = parse_term(&lang, "B", "(Box 42)").unwrap();

    let mut concrete = Machine::concrete(&lang, &semantics);
    let concrete_states = concrete.apply(&State::new(term.clone())).unwrap();
    let concrete_result = &concrete_states[0];
    let DPattern::Addr(concrete_addr) = &concrete_result.term else {
        panic!("expected an address");
    };
    let concrete_value = concrete_result.store.lookup_one(concrete_addr).unwrap().clone();

    let mut abstracted = Machine::abstracted(&lang, &semantics);
    let abs_results = abstracted.apply_abs(&AbsState::new(term)).unwrap();
    let (abs_result, _) = &abs_results[0];
    let DPattern::Addr(abs_addr) = &abs_result.term else {
        panic!("expected an address");
    };
    assert!(
        abs_result.store.lookup(abs_addr).unwrap().contains(&concrete_value),
        "the abstract join set must cover the concrete stored value"
    );
}

/// An ω egal address compared with itself is only `may`-equal: the abstract
/// name stands for several concrete cells.
#[test]
fn saturated_egal_self_comparison_is_may() {
    let lang = box_language();
    let store = Store::new();
    let mut counts = strata::Counts::new();
    let addr = strata::Address::egal("A", strata::AddrName::Fresh(0));
    let d = DPattern::Addr(addr.clone());

    assert_eq!(
        strata::values_equal_abs(&lang, &d, &d, &store, &counts).unwrap(),
        strata::Ternary::MustTrue,
        "below saturation, identity is definite"
    );
    counts.bump(&addr);
    counts.bump(&addr); // ω
    assert_eq!(
        strata::values_equal_abs(&lang, &d, &d, &store, &counts).unwrap(),
        strata::Ternary::May,
        "a saturated abstract address may denote distinct concrete cells"
    );
}

/// An external space's special-equality oracle overrides structural payload
/// comparison in abstract mode.
#[test]
fn external_special_equality_oracle() {
    let mut ext = strata::ExternalSpace::precise("Blob", |d| matches!(d, DPattern::Atom(_)));
    ext.special_equal = Some(Arc::new(|_, _| strata::Ternary::May));
    let lang = Language::new("ext", [(Arc::from("Blob"), Space::External(ext))]).unwrap();

    let a = DPattern::External(strata::ExternalValue {
        space: Arc::from("Blob"),
        payload: Box::new(DPattern::number(1)),
    });
    let b = DPattern::External(strata::ExternalValue {
        space: Arc::from("Blob"),
        payload: Box::new(DPattern::number(1)),
    });
    assert_eq!(
        strata::values_equal_abs(&lang, &a, &b, &Store::new(), &strata::Counts::new()).unwrap(),
        strata::Ternary::May,
        "the oracle's answer wins over structural payload equality"
    );
}

/// Abstract allocation is deterministic in (rule, site): two runs of the
/// same rule on the same input produce the same abstract address.
#[test]
fn abstract_allocation_is_deterministic() {
    let lang = box_language();
    let rule = box_rule(&lang);
    let semantics = Semantics::new([rule.clone()]);
    let mut machine = Machine::abstracted(&lang, &semantics);

    let start = AbsState::new(parse_term(&lang, "B", "(Box 1)").unwrap());
    let first = machine.apply_rule_abs(&rule, &start).unwrap();
    let second = machine.apply_rule_abs(&rule, &start).unwrap();
    assert_eq!(
        first[0].0.term, second[0].0.term,
        "site-derived names do not depend on run history"
    );
}

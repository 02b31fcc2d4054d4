//! Round-trip property (print → parse is the identity for in-space terms)
//! and the parser's error surface.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use strata::{
    Alternative, Atom, Component, DPattern, ExternalSpace, Language, Precision, Stage, Variant, parse_term,
    print_term,
};

fn closure_language() -> Language {
    let var = Variant::new("Var", [Component::space("X")]);
    let lam = Variant::new("Lam", [Component::space("X"), Component::space("E")]);
    let app = Variant::new("App", [Component::space("E"), Component::space("E")]);
    let clo = Variant::new(
        "Clo",
        [
            Component::space("E"),
            Component::QualifiedMap {
                domain: Box::new(Component::space("X")),
                precision: Precision::DiscreteAbstraction,
                range: Box::new(Component::address("A")),
            },
        ],
    );
    let lit = Variant::new("Lit", [Component::Anything]);
    Language::new(
        "clo",
        [
            (
                Arc::from("E"),
                strata::Space::user_trusted([
                    Alternative::Variant(app),
                    Alternative::Variant(lam),
                    Alternative::Variant(var),
                    Alternative::Variant(lit),
                ]),
            ),
            (Arc::from("V"), strata::Space::user([Alternative::Variant(clo)])),
            (
                Arc::from("X"),
                strata::Space::External(ExternalSpace::precise("X", |d| {
                    matches!(d, DPattern::Atom(Atom::Symbol(_)))
                })),
            ),
            (Arc::from("Heap"), strata::Space::address("A")),
        ],
    )
    .unwrap()
}

fn roundtrip(lang: &Language, space: &str, source: &str) {
    let term = parse_term(lang, space, source).unwrap();
    let printed = print_term(&term);
    assert_eq!(printed, source, "printing should reproduce the source form");
    let reparsed = parse_term(lang, space, &printed).unwrap();
    assert_eq!(reparsed, term, "parse(print(d)) = d");
}

// =============================================================================
// 1. Round trips
// =============================================================================

/// Nested variant terms round-trip.
#[test]
fn variant_roundtrip() {
    let lang = closure_language();
    roundtrip(&lang, "E", "(App (Lam f (App (Var f) (Var x))) (Var y))");
}

/// Closures with a qualified-map environment component round-trip; the map
/// kind comes from the component, so equality survives.
#[test]
fn qualified_map_roundtrip() {
    let lang = closure_language();
    roundtrip(&lang, "V", "(Clo (Lam x (Var x)) {y @0 z @1})");
}

/// Atoms of every flavor round-trip under `Anything`.
#[test]
fn atom_roundtrip() {
    let lang = closure_language();
    roundtrip(&lang, "E", "(Lit 12345678901234567890123456789)");
    roundtrip(&lang, "E", "(Lit #t)");
    roundtrip(&lang, "E", "(Lit #\\space)");
    roundtrip(&lang, "E", "(Lit \"a\\nb\")");
    roundtrip(&lang, "E", "(Lit hello-world)");
}

/// Set literals round-trip under `Anything`.
#[test]
fn set_roundtrip() {
    let lang = closure_language();
    roundtrip(&lang, "E", "(Lit #{1 2 3})");
}

/// Egal addresses round-trip through their serialized identifiers.
#[test]
fn address_roundtrip() {
    let lang = closure_language();
    roundtrip(&lang, "Heap", "@7");
    roundtrip(&lang, "Heap", "k0");
}

/// Membership holds for everything the parser accepts (invariant 7 setup).
#[test]
fn parsed_terms_are_in_space() {
    let lang = closure_language();
    for (space, source) in [
        ("E", "(App (Var a) (Var b))"),
        ("V", "(Clo (Var a) {x @0})"),
        ("Heap", "@3"),
    ] {
        let term = parse_term(&lang, space, source).unwrap();
        assert!(
            lang.in_space(space, &term).unwrap(),
            "parse result of {source} must lie in `{space}`"
        );
    }
}

// =============================================================================
// 2. Error surface
// =============================================================================

/// Unknown heads, arity mismatches, and component mismatches carry the
/// parse stage tag.
#[test]
fn parse_error_stages() {
    let lang = closure_language();
    for source in [
        "(Nope a)",  // unknown variant head
        "(Var a b)", // arity mismatch
        "(Var 42)",  // component type mismatch (number is not in X)
        "(Var a",    // unterminated form
    ] {
        let err = parse_term(&lang, "E", source).unwrap_err();
        assert_eq!(err.stage, Stage::Parse, "source {source:?} should fail in the parser");
    }

    // A set literal where the closure's map component is expected.
    let err = parse_term(&lang, "V", "(Clo (Var a) #{1})").unwrap_err();
    assert_eq!(err.stage, Stage::Parse);
}

/// Parsing against an undefined space errors with the in-space stage.
#[test]
fn undefined_space_is_hard_error() {
    let lang = closure_language();
    let err = parse_term(&lang, "Ghost", "(Var a)").unwrap_err();
    assert_eq!(err.stage, Stage::InSpace);
}

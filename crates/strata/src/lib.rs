//! A semantics engineering framework: define a language by its spaces,
//! reduction rules, and meta-functions, then execute those rules on terms —
//! concretely (exact, one result per deterministic choice) or abstractly
//! (finitary, sound over-approximation with explicit non-determinism and
//! cardinality tracking).
//!
//! The engine is layered, leaves first: the value/space model
//! ([`DPattern`], [`Space`], [`Language`]), the partitioned [`Store`] with
//! per-address [`Cardinality`], the matcher ([`Pattern`], [`Env`]), the
//! expression evaluator ([`Expr`]), and the rule driver ([`Machine`],
//! [`Rule`], [`Semantics`]). Surface syntax is an s-expression boundary
//! ([`parse_term`] / [`print_term`]).

mod error;
mod expr;
mod limits;
mod pattern;
mod rules;
mod sexp;
mod space;
mod store;
mod tracer;
mod value;

pub use crate::{
    error::{EngineError, EngineResult, Stage},
    expr::{BindingForm, EvalCtx, EvalOutcome, Expr, Flow, Mode, StoreInteraction, eval, eval_bindings},
    limits::Limits,
    pattern::{Env, Pattern, Quality, Quantifier, match_abstract, match_concrete, values_equal, values_equal_abs},
    rules::{AbsState, Machine, MetaFunction, Rule, Semantics, State, TrustedAbstract, TrustedConcrete},
    sexp::{Sexp, parse_term, print_term, read_sexp},
    space::{Alternative, Component, ExternalSpace, Language, Precision, Space, Ternary, Variant},
    store::{AddrGen, Cardinality, Counts, Store, StoreStats},
    tracer::{NoopTracer, RecordingTracer, ReductionTracer, StderrTracer, TraceEvent},
    value::{AddrKind, AddrName, Address, Atom, DPattern, ExternalValue, MapKind, MapValue, SetValue, VariantValue},
};

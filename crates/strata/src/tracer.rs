//! Reduction tracing infrastructure.
//!
//! A trait-based tracing system with zero-cost abstraction: the engine is
//! parameterized over a [`ReductionTracer`], and with [`NoopTracer`] every
//! hook compiles away through monomorphization. Concrete implementations
//! collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable reduction log to stderr |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortems |

use crate::value::Address;

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A rule produced `results` successor states.
    RuleFired { rule: String, results: usize },
    /// An address was allocated.
    Alloc { addr: String },
    /// The store was written at `addr`.
    StoreWrite { addr: String, strong: bool },
    /// A meta-function was dispatched.
    MetaCall { name: String },
    /// One fixed-point iteration completed with `frontier` pending states.
    Step { iteration: usize, frontier: usize },
}

/// Hook points at key reduction events. All methods default to no-ops, so
/// implementations only override what they care about.
pub trait ReductionTracer {
    fn rule_fired(&mut self, _rule: &str, _results: usize) {}
    fn alloc(&mut self, _addr: &Address) {}
    fn store_write(&mut self, _addr: &Address, _strong: bool) {}
    fn mf_called(&mut self, _name: &str) {}
    fn step(&mut self, _iteration: usize, _frontier: usize) {}
}

/// Zero-cost no-op tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl ReductionTracer for NoopTracer {}

/// Logs every event to stderr. Debugging only.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl ReductionTracer for StderrTracer {
    fn rule_fired(&mut self, rule: &str, results: usize) {
        eprintln!("rule {rule} fired: {results} successor(s)");
    }

    fn alloc(&mut self, addr: &Address) {
        eprintln!("alloc {addr}");
    }

    fn store_write(&mut self, addr: &Address, strong: bool) {
        let kind = if strong { "strong" } else { "weak" };
        eprintln!("{kind} write at {addr}");
    }

    fn mf_called(&mut self, name: &str) {
        eprintln!("meta-function {name}");
    }

    fn step(&mut self, iteration: usize, frontier: usize) {
        eprintln!("step {iteration}: {frontier} pending");
    }
}

/// Records every event for later inspection; tests assert on the firing
/// order of rules and allocations.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the rules that fired, in order.
    pub fn fired_rules(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::RuleFired { rule, .. } => Some(rule.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ReductionTracer for RecordingTracer {
    fn rule_fired(&mut self, rule: &str, results: usize) {
        self.events.push(TraceEvent::RuleFired {
            rule: rule.to_string(),
            results,
        });
    }

    fn alloc(&mut self, addr: &Address) {
        self.events.push(TraceEvent::Alloc {
            addr: addr.to_string(),
        });
    }

    fn store_write(&mut self, addr: &Address, strong: bool) {
        self.events.push(TraceEvent::StoreWrite {
            addr: addr.to_string(),
            strong,
        });
    }

    fn mf_called(&mut self, name: &str) {
        self.events.push(TraceEvent::MetaCall {
            name: name.to_string(),
        });
    }

    fn step(&mut self, iteration: usize, frontier: usize) {
        self.events.push(TraceEvent::Step { iteration, frontier });
    }
}

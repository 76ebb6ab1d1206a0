//! Property tests over random combinator trees.
//!
//! Every generated program must run to completion with every region closed
//! exactly once, children before parents, no live tokens left behind, and the
//! number of publications predicted by a small counting model.

#[macro_use]
mod common;

use common::*;
use orcflow::graph::{Arg, GraphBuilder};
use orcflow::runtime::HaltReason;
use orcflow::site::builtin::Ltimer;
use orcflow::types::{NodeId, Value};
use proptest::prelude::*;

/// Program shape. Leaves reach `echo` and `Ltimer` through the environment.
#[derive(Debug, Clone)]
enum Expr {
    Echo(i64),
    Silent,
    Timer(u8),
    Fork(Box<Expr>, Box<Expr>),
    Semi(Box<Expr>, Box<Expr>),
    Otherwise(Box<Expr>, Box<Expr>),
    Pull(Box<Expr>, Box<Expr>),
    Pruning(Box<Expr>, Box<Expr>),
    Clock(Box<Expr>),
}

impl Expr {
    /// Publications the expression makes.
    fn count(&self) -> usize {
        match self {
            Self::Echo(_) | Self::Timer(_) => 1,
            Self::Silent => 0,
            Self::Fork(l, r) | Self::Semi(l, r) => l.count() + r.count(),
            Self::Otherwise(l, r) => {
                let left = l.count();
                if left > 0 {
                    left
                } else {
                    r.count()
                }
            }
            // Each left publication is bound and runs its own copy of `r`.
            Self::Pull(l, r) => l.count() * r.count(),
            // The body also echoes the pruned value once it exists.
            Self::Pruning(body, dep) => body.count() + usize::from(dep.count() > 0),
            Self::Clock(e) => e.count(),
        }
    }

    /// Emits nodes; `bound` is the number of bindings above the two sites.
    fn build(&self, b: &mut GraphBuilder, bound: usize) -> NodeId {
        let echo = Arg::Var(bound + 1);
        let timer = Arg::Var(bound);
        match self {
            Self::Echo(n) => b.call_publish(echo, vec![Arg::Const(Value::Int(*n))]),
            Self::Silent => b.silent(),
            Self::Timer(d) => b.call_publish(timer, vec![Arg::Const(Value::Int(i64::from(*d)))]),
            Self::Fork(l, r) => {
                let (l, r) = (l.build(b, bound), r.build(b, bound));
                b.fork(l, r)
            }
            Self::Semi(l, r) => {
                let (l, r) = (l.build(b, bound), r.build(b, bound));
                b.semi(l, r)
            }
            Self::Otherwise(l, r) => {
                let (l, r) = (l.build(b, bound), r.build(b, bound));
                b.otherwise(l, r)
            }
            Self::Pull(l, r) => {
                let (l, r) = (l.build(b, bound), r.build(b, bound + 1));
                b.pull(l, r)
            }
            Self::Pruning(body, dep) => {
                let inner = body.build(b, bound + 1);
                let use_future = b.call_publish(Arg::Var(bound + 2), vec![Arg::Var(0)]);
                let body = b.fork(inner, use_future);
                let dep = dep.build(b, bound);
                b.pruning(body, dep, Some("x"))
            }
            Self::Clock(e) => {
                let e = e.build(b, bound);
                b.with_clock(e)
            }
        }
    }
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        3 => (0i64..100).prop_map(Expr::Echo),
        1 => Just(Expr::Silent),
        2 => (0u8..6).prop_map(Expr::Timer),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            3 => (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::Fork(Box::new(l), Box::new(r))),
            2 => (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::Semi(Box::new(l), Box::new(r))),
            2 => (inner.clone(), inner.clone())
                .prop_map(|(l, r)| Expr::Otherwise(Box::new(l), Box::new(r))),
            1 => (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::Pull(Box::new(l), Box::new(r))),
            2 => (inner.clone(), inner.clone())
                .prop_map(|(body, dep)| Expr::Pruning(Box::new(body), Box::new(dep))),
            1 => inner.prop_map(|e| Expr::Clock(Box::new(e))),
        ]
    })
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn random_programs_close_every_region(expr in arb_expr()) {
        init_test_logging_with_level(tracing::Level::INFO);
        let mut b = GraphBuilder::new(2);
        let root = expr.build(&mut b, 0);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(echo()), Value::site(Ltimer)]);
        let report = exec.run().expect("completes");

        prop_assert_eq!(report.halted_by, Some(HaltReason::Completed));
        prop_assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        prop_assert_eq!(exec.live_tokens(), 0);
        prop_assert_eq!(report.publications.len(), expr.count());
        assert_regions_balanced(&exec.trace_events());
    }

    #[test]
    fn logical_time_is_the_longest_root_delay(delays in prop::collection::vec(0u8..20, 1..8)) {
        init_test_logging_with_level(tracing::Level::INFO);
        let mut b = GraphBuilder::new(2);
        let mut root = None;
        for d in &delays {
            let leaf = b.call_publish(Arg::Var(0), vec![Arg::Const(Value::Int(i64::from(*d)))]);
            root = Some(match root {
                None => leaf,
                Some(prev) => b.fork(prev, leaf),
            });
        }
        let graph = b.build(root.expect("at least one delay")).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo()), Value::site(Ltimer)])
            .run()
            .expect("completes");
        let longest = delays.iter().copied().max().map_or(0, u64::from);
        prop_assert_eq!(report.logical_time, longest);
        prop_assert_eq!(report.publications.len(), delays.len());
    }
}

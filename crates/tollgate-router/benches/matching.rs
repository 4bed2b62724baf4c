//! Selector/rule resolution benchmarks.
//!
//! Run with: cargo bench -p tollgate-router

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tollgate_model::{
    ConditionData, Operator, ParamType, RequestDescriptor, RpcType, RuleData, SelectorData,
    SelectorType,
};
use tollgate_router::{RuleSet, SelectorSet};

const MODULES: [&str; 6] = ["users", "orders", "products", "customers", "invoices", "payments"];

/// Selectors keyed on module; the matching one sits at the end of the scan.
fn build_selectors(count: usize) -> SelectorSet {
    SelectorSet::new((0..count).map(|i| {
        let module = format!("{}-{}", MODULES[i % MODULES.len()], i);
        SelectorData::new(format!("s{i}"), "divide", i as i32).with_condition(ConditionData::new(
            ParamType::Post,
            "module",
            Operator::Eq,
            module,
        ))
    }))
}

fn build_rules(count: usize) -> RuleSet {
    RuleSet::new((0..count).map(|i| {
        RuleData::new(format!("r{i}"), "s0", i as i32)
            .with_condition(ConditionData::new(
                ParamType::Path,
                "",
                Operator::Match,
                format!(r"^/api/v{i}/.+$"),
            ))
            .with_condition(ConditionData::new(
                ParamType::Header,
                "x-version",
                Operator::Gt,
                "3",
            ))
    }))
}

fn bench_selector_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector_resolve");

    for count in [10, 100, 1000] {
        let set = build_selectors(count);
        let last = count - 1;
        let hit = RequestDescriptor::new(
            format!("{}-{}", MODULES[last % MODULES.len()], last),
            "list",
            RpcType::Http,
        );
        let miss = RequestDescriptor::new("unknown", "list", RpcType::Http);

        group.bench_with_input(BenchmarkId::new("last_match", count), &set, |b, set| {
            b.iter(|| set.resolve(black_box(&hit)))
        });
        group.bench_with_input(BenchmarkId::new("no_match", count), &set, |b, set| {
            b.iter(|| set.resolve(black_box(&miss)))
        });
    }

    group.finish();
}

fn bench_rule_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_resolve");

    for count in [10, 100] {
        let rules = build_rules(count);
        let req = RequestDescriptor::new("orders", "list", RpcType::Http)
            .with_path(format!("/api/v{}/orders", count - 1))
            .with_header("x-version", "4");

        group.bench_with_input(BenchmarkId::new("regex_last_match", count), &rules, |b, rules| {
            b.iter(|| rules.resolve(SelectorType::CustomFlow, black_box(&req)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_selector_resolution, bench_rule_resolution);
criterion_main!(benches);

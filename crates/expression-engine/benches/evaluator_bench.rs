//! 表达式求值器性能基准测试
//!
//! 覆盖解析、求值和依赖提取三条热路径。

use criterion::{Criterion, criterion_group, criterion_main};
use expression_engine::{EvaluationContext, Evaluator, extract_reads};
use serde_json::{Value, json};
use std::hint::black_box;

fn settlement_expression() -> Value {
    json!({"and": [
        {">=": [{"var": "population"}, 5000]},
        {"in": ["trade_route", {"var": "tags"}]},
        {"or": [
            {"==": [{"var": "region.climate"}, "temperate"]},
            {">": [{"var": "gold_income"}, 200]}
        ]}
    ]})
}

fn settlement_context() -> EvaluationContext {
    EvaluationContext::new(json!({
        "population": 6000,
        "tags": ["trade_route", "coastal"],
        "region": {"climate": "temperate"},
        "gold_income": 150
    }))
}

fn bench_parse(c: &mut Criterion) {
    let expr = settlement_expression();
    let evaluator = Evaluator::new();

    c.bench_function("parse_expression", |b| {
        b.iter(|| evaluator.parse(black_box(&expr)))
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let evaluator = Evaluator::new();
    let expr = evaluator.parse(&settlement_expression()).unwrap();
    let context = settlement_context();

    c.bench_function("evaluate_parsed", |b| {
        b.iter(|| evaluator.evaluate(black_box(&expr), black_box(&context)))
    });

    let raw = settlement_expression();
    c.bench_function("evaluate_from_json", |b| {
        b.iter(|| evaluator.evaluate_value(black_box(&raw), black_box(&context)))
    });
}

fn bench_evaluate_with_trace(c: &mut Criterion) {
    let evaluator = Evaluator::new();
    let expr = settlement_expression();
    let data = json!({
        "population": 6000,
        "tags": ["trade_route", "coastal"],
        "region": {"climate": "temperate"},
        "gold_income": 150
    });

    c.bench_function("evaluate_with_trace", |b| {
        b.iter(|| evaluator.evaluate_with_trace(black_box(&expr), black_box(&data)))
    });
}

fn bench_extract_reads(c: &mut Criterion) {
    let evaluator = Evaluator::new();
    let expr = evaluator.parse(&settlement_expression()).unwrap();

    c.bench_function("extract_reads", |b| {
        b.iter(|| extract_reads(black_box(&expr)))
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_evaluate,
    bench_evaluate_with_trace,
    bench_extract_reads
);
criterion_main!(benches);

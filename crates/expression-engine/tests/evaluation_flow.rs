//! 表达式引擎集成测试
//!
//! 按典型的战役条件用例走完整流程：校验 -> 解析 -> 求值 -> 追踪。

use expression_engine::{
    EngineError, EvaluationContext, Evaluator, extract_reads,
};
use serde_json::json;

#[test]
fn settlement_trade_hub_condition_full_flow() {
    let expression = json!({"and": [
        {">=": [{"var": "population"}, 5000]},
        {"in": ["trade_route", {"var": "tags"}]}
    ]});
    let data = json!({"population": 6000, "tags": ["trade_route", "coastal"]});

    let evaluator = Evaluator::new();

    // 解析 + 求值
    let expr = evaluator.parse(&expression).unwrap();
    let outcome = evaluator.evaluate(&expr, &EvaluationContext::new(data.clone()));
    assert_eq!(outcome.value, json!(true));

    // 读依赖与求值解析记录一致
    let reads = extract_reads(&expr);
    assert_eq!(reads.len(), 2);
    assert!(reads.contains("population"));
    assert!(reads.contains("tags"));
    assert_eq!(outcome.resolved.len(), 2);

    // 追踪：4 步, 全部通过
    let traced = evaluator.evaluate_with_trace(&expression, &data);
    assert!(traced.success);
    assert_eq!(traced.trace.len(), 4);
    assert!(traced.trace.iter().all(|s| s.passed));
    assert_eq!(traced.value, Some(json!(true)));
}

#[test]
fn partial_context_degrades_without_error() {
    let expression = json!({"and": [
        {">=": [{"var": "population"}, 5000]},
        {"in": ["trade_route", {"var": "tags"}]}
    ]});
    // tags 缺失
    let data = json!({"population": 6000});

    let evaluator = Evaluator::new();
    let outcome = evaluator
        .evaluate_value(&expression, &EvaluationContext::new(data.clone()))
        .unwrap();

    // in 对 missing 哨兵求值为 false, 整体 false 而非报错
    assert_eq!(outcome.value, json!(false));
    assert!(outcome.unresolved.contains("tags"));

    let traced = evaluator.evaluate_with_trace(&expression, &data);
    assert!(traced.success);
    assert!(!traced.trace[3].passed);
}

#[test]
fn depth_eleven_rejected_with_no_side_effects() {
    // 默认上限 10, 构造深度 11
    let mut expression = json!({"var": "x"});
    for _ in 0..10 {
        expression = json!({"!": expression});
    }

    let evaluator = Evaluator::new();
    let err = evaluator
        .evaluate_value(&expression, &EvaluationContext::new(json!({"x": true})))
        .unwrap_err();
    assert!(matches!(err, EngineError::DepthExceeded { depth: 11, max: 10 }));

    // 自定义上限放行同一表达式
    let relaxed = Evaluator::new().with_max_depth(16);
    assert!(relaxed
        .evaluate_value(&expression, &EvaluationContext::new(json!({"x": true})))
        .is_ok());
}

#[test]
fn repeated_evaluation_is_deterministic() {
    let expression = json!({"if": [
        {">": [{"var": "threat_level"}, 3]},
        {"cat": ["raid:", {"var": "region.name"}]},
        "peaceful"
    ]});
    let data = json!({"threat_level": 5, "region": {"name": "Westmarch"}});

    let evaluator = Evaluator::new();
    let first = evaluator.evaluate_with_trace(&expression, &data);
    let second = evaluator.evaluate_with_trace(&expression, &data);

    assert_eq!(first.value, Some(json!("raid:Westmarch")));
    assert_eq!(first.value, second.value);
    assert_eq!(first.trace.len(), second.trace.len());
}

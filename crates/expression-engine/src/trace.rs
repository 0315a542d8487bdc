//! 带追踪的求值
//!
//! 追踪是面向用户的一等输出（"这个条件为什么为真"），不是日志：
//! 固定四步——表达式校验、上下文构建、表达式求值、变量解析，
//! 每步记录输入/输出和通过与否。校验失败时追踪在第一步终止，
//! 不产生任何求值副作用。

use serde::Serialize;
use serde_json::{Value, json};

use crate::context::EvaluationContext;
use crate::evaluator::{Evaluator, is_truthy};
use crate::extractor::extract_reads;

/// 追踪步骤
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub step: u32,
    pub description: String,
    pub input: Value,
    pub output: Value,
    pub passed: bool,
}

/// 带追踪的求值结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedEvaluation {
    pub success: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
    pub trace: Vec<TraceStep>,
}

impl Evaluator {
    /// 求值并产出逐步追踪
    ///
    /// 成功路径固定产出 4 个步骤；校验/解析失败时只有第一步且
    /// `success = false`。
    pub fn evaluate_with_trace(
        &self,
        expression: &Value,
        context_data: &Value,
    ) -> TracedEvaluation {
        let mut trace = Vec::with_capacity(4);

        // 第 1 步: 表达式校验（深度上限 + 结构合法性, 先于一切求值工作）
        let expr = match self.parse(expression) {
            Ok(expr) => {
                trace.push(TraceStep {
                    step: 1,
                    description: "表达式校验".to_string(),
                    input: expression.clone(),
                    output: json!({"valid": true, "maxDepth": self.max_depth()}),
                    passed: true,
                });
                expr
            }
            Err(e) => {
                trace.push(TraceStep {
                    step: 1,
                    description: "表达式校验".to_string(),
                    input: expression.clone(),
                    output: json!({"valid": false, "reason": e.to_string()}),
                    passed: false,
                });
                return TracedEvaluation {
                    success: false,
                    value: None,
                    error: Some(e.to_string()),
                    trace,
                };
            }
        };

        // 第 2 步: 上下文构建
        let context = EvaluationContext::new(context_data.clone());
        let field_count = context_data.as_object().map(|m| m.len()).unwrap_or(0);
        trace.push(TraceStep {
            step: 2,
            description: "上下文构建".to_string(),
            input: context_data.clone(),
            output: json!({"topLevelFields": field_count}),
            passed: true,
        });

        // 第 3 步: 表达式求值
        let outcome = self.evaluate(&expr, &context);
        trace.push(TraceStep {
            step: 3,
            description: "表达式求值".to_string(),
            input: expression.clone(),
            output: outcome.value.clone(),
            passed: is_truthy(&outcome.value),
        });

        // 第 4 步: 变量解析清单
        let reads: Vec<String> = extract_reads(&expr).into_iter().collect();
        trace.push(TraceStep {
            step: 4,
            description: "变量解析".to_string(),
            input: json!(reads),
            output: json!({
                "resolved": outcome.resolved,
                "unresolved": outcome.unresolved,
            }),
            passed: outcome.unresolved.is_empty(),
        });

        TracedEvaluation {
            success: true,
            value: Some(outcome.value),
            error: None,
            trace,
        }
    }
}

//! 表达式语法树
//!
//! 条件表达式的 JSON 线上格式是 json-logic 风格的单键对象：
//! `{"var": "population"}`、`{"and": [...]}`、`{">=": [a, b]}`，
//! 标量和数组直接作为字面量。解析为封闭和类型 `Expr` 后，
//! 求值器对操作符穷尽匹配。
//!
//! `validate` 在任何解析/求值工作开始之前运行，拒绝结构非法的节点和
//! 超出嵌套深度上限的表达式（防御构造出的递归膨胀负载）。

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::operators::Operator;

/// 默认最大嵌套深度
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// 表达式节点
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// 字面量（任意 JSON 标量或对象值）
    Literal(Value),
    /// 变量引用（点号路径，支持默认值）
    Var {
        path: String,
        default: Option<Value>,
    },
    /// 数组（元素逐个求值）
    Array(Vec<Expr>),
    /// 操作符节点
    Op { op: Operator, args: Vec<Expr> },
}

impl Expr {
    /// 从 JSON 值解析表达式树
    ///
    /// 只做结构解析，深度上限由 [`validate`] 负责——调用方必须先校验。
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                if map.len() != 1 {
                    return Err(EngineError::Malformed(format!(
                        "操作符节点必须是单键对象, 实际 {} 个键",
                        map.len()
                    )));
                }
                let Some((key, arg)) = map.iter().next() else {
                    return Err(EngineError::Malformed("操作符节点不能为空对象".to_string()));
                };

                if key == "var" {
                    return Self::parse_var(arg);
                }

                let op = Operator::from_symbol(key)
                    .ok_or_else(|| EngineError::UnknownOperator(key.clone()))?;

                let args = match arg {
                    Value::Array(items) => items
                        .iter()
                        .map(Self::from_value)
                        .collect::<Result<Vec<_>>>()?,
                    // 单参数操作符允许省略数组包装, 如 {"!": {"var":"active"}}
                    other => vec![Self::from_value(other)?],
                };

                if args.len() < op.min_args() {
                    return Err(EngineError::Arity {
                        op: op.symbol().to_string(),
                        expected: op.min_args(),
                        actual: args.len(),
                    });
                }

                Ok(Self::Op { op, args })
            }
            Value::Array(items) => Ok(Self::Array(
                items
                    .iter()
                    .map(Self::from_value)
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// 解析 {"var": ...} 节点
    ///
    /// 支持 `{"var": "path"}` 和 `{"var": ["path", default]}` 两种形式。
    fn parse_var(arg: &Value) -> Result<Self> {
        match arg {
            Value::String(path) => Ok(Self::Var {
                path: path.clone(),
                default: None,
            }),
            Value::Array(items) => {
                let path = items
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EngineError::Malformed("var 的第一个参数必须是路径字符串".to_string())
                    })?
                    .to_string();
                let default = items.get(1).cloned();
                Ok(Self::Var { path, default })
            }
            other => Err(EngineError::Malformed(format!(
                "var 参数必须是字符串或 [路径, 默认值] 数组, 实际: {other}"
            ))),
        }
    }

    /// 序列化回 JSON 线上格式
    pub fn to_value(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Var { path, default } => match default {
                None => serde_json::json!({ "var": path }),
                Some(d) => serde_json::json!({ "var": [path, d] }),
            },
            Self::Array(items) => Value::Array(items.iter().map(Expr::to_value).collect()),
            Self::Op { op, args } => {
                let args: Vec<Value> = args.iter().map(Expr::to_value).collect();
                serde_json::json!({ op.symbol(): args })
            }
        }
    }
}

/// 校验 JSON 表达式：结构合法性 + 嵌套深度上限
///
/// 深度超限是校验失败而非运行时异常，且必须发生在任何求值工作之前。
/// 返回实际深度供追踪输出使用。
pub fn validate(value: &Value, max_depth: usize) -> Result<usize> {
    let depth = check_node(value, 1, max_depth)?;
    Ok(depth)
}

fn check_node(value: &Value, depth: usize, max_depth: usize) -> Result<usize> {
    if depth > max_depth {
        return Err(EngineError::DepthExceeded {
            depth,
            max: max_depth,
        });
    }

    match value {
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(EngineError::Malformed(format!(
                    "操作符节点必须是单键对象, 实际 {} 个键",
                    map.len()
                )));
            }
            let Some((key, arg)) = map.iter().next() else {
                return Err(EngineError::Malformed("操作符节点不能为空对象".to_string()));
            };

            if key != "var" && Operator::from_symbol(key).is_none() {
                return Err(EngineError::UnknownOperator(key.clone()));
            }

            let mut max_seen = depth;
            match arg {
                Value::Array(items) => {
                    for item in items {
                        max_seen = max_seen.max(check_node(item, depth + 1, max_depth)?);
                    }
                }
                other => {
                    max_seen = max_seen.max(check_node(other, depth + 1, max_depth)?);
                }
            }
            Ok(max_seen)
        }
        Value::Array(items) => {
            let mut max_seen = depth;
            for item in items {
                max_seen = max_seen.max(check_node(item, depth + 1, max_depth)?);
            }
            Ok(max_seen)
        }
        _ => Ok(depth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_literal() {
        assert_eq!(Expr::from_value(&json!(42)).unwrap(), Expr::Literal(json!(42)));
        assert_eq!(
            Expr::from_value(&json!("hello")).unwrap(),
            Expr::Literal(json!("hello"))
        );
        assert_eq!(Expr::from_value(&json!(null)).unwrap(), Expr::Literal(json!(null)));
    }

    #[test]
    fn test_parse_var() {
        let expr = Expr::from_value(&json!({"var": "population"})).unwrap();
        assert_eq!(
            expr,
            Expr::Var {
                path: "population".to_string(),
                default: None
            }
        );

        let expr = Expr::from_value(&json!({"var": ["tags", []]})).unwrap();
        assert_eq!(
            expr,
            Expr::Var {
                path: "tags".to_string(),
                default: Some(json!([]))
            }
        );
    }

    #[test]
    fn test_parse_operator() {
        let expr = Expr::from_value(&json!({">=": [{"var": "population"}, 5000]})).unwrap();
        match expr {
            Expr::Op { op, args } => {
                assert_eq!(op, Operator::Gte);
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_unwrapped_single_arg() {
        let expr = Expr::from_value(&json!({"!": {"var": "active"}})).unwrap();
        match expr {
            Expr::Op { op, args } => {
                assert_eq!(op, Operator::Not);
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reject_multi_key_object() {
        let err = Expr::from_value(&json!({"and": [], "or": []})).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
    }

    #[test]
    fn test_reject_unknown_operator() {
        let err = Expr::from_value(&json!({"xor": [true, false]})).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperator(op) if op == "xor"));
    }

    #[test]
    fn test_reject_bad_arity() {
        let err = Expr::from_value(&json!({">=": [{"var": "a"}]})).unwrap_err();
        assert!(matches!(err, EngineError::Arity { .. }));
    }

    #[test]
    fn test_to_value_roundtrip() {
        let original = json!({"and": [
            {">=": [{"var": "population"}, 5000]},
            {"in": ["trade_route", {"var": "tags"}]}
        ]});
        let expr = Expr::from_value(&original).unwrap();
        assert_eq!(expr.to_value(), original);
    }

    #[test]
    fn test_validate_depth_ok() {
        let value = json!({"and": [{">=": [{"var": "a"}, 1]}]});
        // and(2) -> >=(3) -> var/literal(4)
        let depth = validate(&value, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(depth, 4);
    }

    #[test]
    fn test_validate_depth_exceeded() {
        // 构造深度为 11 的嵌套表达式, 默认上限 10
        let mut value = json!({"var": "x"});
        for _ in 0..10 {
            value = json!({"!": value});
        }
        let err = validate(&value, DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, EngineError::DepthExceeded { .. }));
    }

    #[test]
    fn test_validate_rejects_malformed_before_depth() {
        let err = validate(&json!({"bogus_op": [1, 2]}), DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperator(_)));
    }
}

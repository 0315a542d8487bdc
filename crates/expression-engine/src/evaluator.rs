//! 表达式求值器
//!
//! 纯函数式的递归树遍历：不做外部 I/O，不修改上下文。未解析的变量
//! 路径降级为 missing 哨兵（null + 记入 unresolved 集合）而不是抛错，
//! 由调用方决定缺值是否应当短路。
//!
//! 求值本身不会失败——结构与深度问题在 [`crate::ast::validate`] 阶段
//! 已经全部拒绝，操作符对非法类型一律降级（比较返回 false，算术返回
//! null），保证部分上下文下的平滑退化。

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::ast::{DEFAULT_MAX_DEPTH, Expr, validate};
use crate::context::EvaluationContext;
use crate::error::Result;
use crate::operators::Operator;

/// 求值结果
///
/// 除最终值外还携带变量解析记录，供追踪输出和调试使用。
#[derive(Debug, Clone)]
pub struct Outcome {
    pub value: Value,
    /// 成功从上下文解析到的变量及其值
    pub resolved: BTreeMap<String, Value>,
    /// 上下文中不存在且无默认值的变量路径
    pub unresolved: BTreeSet<String>,
}

impl Outcome {
    /// 结果是否为真值（json-logic 真值规则）
    pub fn is_truthy(&self) -> bool {
        is_truthy(&self.value)
    }
}

/// 变量解析记录
#[derive(Debug, Default)]
struct Resolution {
    resolved: BTreeMap<String, Value>,
    unresolved: BTreeSet<String>,
}

/// 表达式求值器
#[derive(Debug, Clone)]
pub struct Evaluator {
    max_depth: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 校验并解析 JSON 表达式
    ///
    /// 深度上限在此强制执行，超限的表达式不会进入任何求值路径。
    pub fn parse(&self, value: &Value) -> Result<Expr> {
        validate(value, self.max_depth)?;
        Expr::from_value(value)
    }

    /// 求值已解析的表达式（不会失败）
    pub fn evaluate(&self, expr: &Expr, context: &EvaluationContext) -> Outcome {
        let mut resolution = Resolution::default();
        let value = eval(expr, context, &mut resolution);
        Outcome {
            value,
            resolved: resolution.resolved,
            unresolved: resolution.unresolved,
        }
    }

    /// 校验、解析并求值 JSON 表达式
    pub fn evaluate_value(&self, value: &Value, context: &EvaluationContext) -> Result<Outcome> {
        let expr = self.parse(value)?;
        Ok(self.evaluate(&expr, context))
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn eval(expr: &Expr, ctx: &EvaluationContext, res: &mut Resolution) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Var { path, default } => match ctx.get_field(path) {
            Some(v) => {
                res.resolved.insert(path.clone(), v.clone());
                v.clone()
            }
            None => match default {
                Some(d) => d.clone(),
                None => {
                    res.unresolved.insert(path.clone());
                    Value::Null
                }
            },
        },
        Expr::Array(items) => Value::Array(items.iter().map(|e| eval(e, ctx, res)).collect()),
        Expr::Op { op, args } => eval_op(*op, args, ctx, res),
    }
}

fn eval_op(op: Operator, args: &[Expr], ctx: &EvaluationContext, res: &mut Resolution) -> Value {
    match op {
        // 逻辑操作符：短路求值，返回决定性的那个参数值（json-logic 语义）
        Operator::And => {
            let mut last = Value::Bool(true);
            for arg in args {
                last = eval(arg, ctx, res);
                if !is_truthy(&last) {
                    return last;
                }
            }
            last
        }
        Operator::Or => {
            let mut last = Value::Bool(false);
            for arg in args {
                last = eval(arg, ctx, res);
                if is_truthy(&last) {
                    return last;
                }
            }
            last
        }
        Operator::Not => Value::Bool(!is_truthy(&eval(&args[0], ctx, res))),

        Operator::Eq => Value::Bool(loose_eq(&eval(&args[0], ctx, res), &eval(&args[1], ctx, res))),
        Operator::Neq => {
            Value::Bool(!loose_eq(&eval(&args[0], ctx, res), &eval(&args[1], ctx, res)))
        }
        Operator::Lt => compare(args, ctx, res, |o| o == std::cmp::Ordering::Less),
        Operator::Lte => compare(args, ctx, res, |o| o != std::cmp::Ordering::Greater),
        Operator::Gt => compare(args, ctx, res, |o| o == std::cmp::Ordering::Greater),
        Operator::Gte => compare(args, ctx, res, |o| o != std::cmp::Ordering::Less),

        Operator::Add => fold_numeric(args, ctx, res, |acc, n| acc + n),
        Operator::Mul => fold_numeric_init(args, ctx, res, 1.0, |acc, n| acc * n),
        Operator::Sub => {
            if args.len() == 1 {
                // 单参数减法即取负
                match as_f64(&eval(&args[0], ctx, res)) {
                    Some(n) => number_value(-n),
                    None => Value::Null,
                }
            } else {
                binary_numeric(args, ctx, res, |a, b| Some(a - b))
            }
        }
        Operator::Div => binary_numeric(args, ctx, res, |a, b| {
            // 除零降级为 null 而非 panic
            if b == 0.0 { None } else { Some(a / b) }
        }),
        Operator::Mod => binary_numeric(args, ctx, res, |a, b| {
            if b == 0.0 { None } else { Some(a % b) }
        }),

        Operator::In => {
            let needle = eval(&args[0], ctx, res);
            let haystack = eval(&args[1], ctx, res);
            let found = match &haystack {
                Value::Array(items) => items.iter().any(|item| loose_eq(item, &needle)),
                Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
                _ => false,
            };
            Value::Bool(found)
        }
        Operator::Missing => {
            let mut missing = Vec::new();
            for arg in args {
                let v = eval(arg, ctx, res);
                for path in flatten_paths(&v) {
                    if ctx.get_field(&path).is_none() {
                        missing.push(Value::String(path));
                    }
                }
            }
            Value::Array(missing)
        }

        Operator::Cat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&stringify(&eval(arg, ctx, res)));
            }
            Value::String(out)
        }
        Operator::StartsWith => string_pair(args, ctx, res, |s, p| s.starts_with(p)),
        Operator::EndsWith => string_pair(args, ctx, res, |s, p| s.ends_with(p)),

        Operator::If => {
            // [条件, 结果, 条件, 结果, ..., 兜底]，惰性求值
            let mut i = 0;
            while i + 1 < args.len() {
                if is_truthy(&eval(&args[i], ctx, res)) {
                    return eval(&args[i + 1], ctx, res);
                }
                i += 2;
            }
            if i < args.len() {
                eval(&args[i], ctx, res)
            } else {
                Value::Null
            }
        }
        Operator::Map => {
            let items = eval(&args[0], ctx, res);
            let Value::Array(items) = items else {
                return Value::Array(vec![]);
            };
            // lambda 的变量路径相对于元素本身, 不计入战役变量的解析记录
            let mut scratch = Resolution::default();
            Value::Array(
                items
                    .iter()
                    .map(|item| {
                        let item_ctx = EvaluationContext::new(item.clone());
                        eval(&args[1], &item_ctx, &mut scratch)
                    })
                    .collect(),
            )
        }
        Operator::Filter => {
            let items = eval(&args[0], ctx, res);
            let Value::Array(items) = items else {
                return Value::Array(vec![]);
            };
            let mut scratch = Resolution::default();
            Value::Array(
                items
                    .into_iter()
                    .filter(|item| {
                        let item_ctx = EvaluationContext::new(item.clone());
                        is_truthy(&eval(&args[1], &item_ctx, &mut scratch))
                    })
                    .collect(),
            )
        }
        Operator::Min => reduce_numeric(args, ctx, res, f64::min),
        Operator::Max => reduce_numeric(args, ctx, res, f64::max),
    }
}

/// json-logic 真值规则：null/false/0/""/[] 为假
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// 宽松相等：数值统一转为 f64 后精确比较（100 == 100.0），其余类型直接比较
fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(fa), Some(fb)) = (as_f64(a), as_f64(b)) {
        return fa == fb;
    }
    a == b
}

/// 尝试将值转换为 f64（数值或数值字符串）
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// 数值结果优先还原为整数，避免 JSON 输出出现 6000.0
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        match serde_json::Number::from_f64(n) {
            Some(num) => Value::Number(num),
            None => Value::Null,
        }
    }
}

fn compare<F>(args: &[Expr], ctx: &EvaluationContext, res: &mut Resolution, check: F) -> Value
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    let a = eval(&args[0], ctx, res);
    let b = eval(&args[1], ctx, res);

    let ordering = match (as_f64(&a), as_f64(&b)) {
        (Some(fa), Some(fb)) => fa.partial_cmp(&fb),
        // 数值比较失败时退回字符串字典序, 其余类型（含 missing）为 false
        _ => match (a.as_str(), b.as_str()) {
            (Some(sa), Some(sb)) => Some(sa.cmp(sb)),
            _ => None,
        },
    };

    Value::Bool(ordering.map(&check).unwrap_or(false))
}

fn fold_numeric<F>(args: &[Expr], ctx: &EvaluationContext, res: &mut Resolution, f: F) -> Value
where
    F: Fn(f64, f64) -> f64,
{
    fold_numeric_init(args, ctx, res, 0.0, f)
}

fn fold_numeric_init<F>(
    args: &[Expr],
    ctx: &EvaluationContext,
    res: &mut Resolution,
    init: f64,
    f: F,
) -> Value
where
    F: Fn(f64, f64) -> f64,
{
    let mut acc = init;
    for arg in args {
        match as_f64(&eval(arg, ctx, res)) {
            Some(n) => acc = f(acc, n),
            // 任一参数非数值（含 missing）时整体降级为 null
            None => return Value::Null,
        }
    }
    number_value(acc)
}

fn binary_numeric<F>(args: &[Expr], ctx: &EvaluationContext, res: &mut Resolution, f: F) -> Value
where
    F: Fn(f64, f64) -> Option<f64>,
{
    let a = as_f64(&eval(&args[0], ctx, res));
    let b = args.get(1).map(|arg| as_f64(&eval(arg, ctx, res)));

    match (a, b) {
        (Some(a), Some(Some(b))) => f(a, b).map(number_value).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn reduce_numeric<F>(args: &[Expr], ctx: &EvaluationContext, res: &mut Resolution, f: F) -> Value
where
    F: Fn(f64, f64) -> f64,
{
    // min/max 允许传单个数组参数或多个标量参数
    let values: Vec<Value> = if args.len() == 1 {
        match eval(&args[0], ctx, res) {
            Value::Array(items) => items,
            other => vec![other],
        }
    } else {
        args.iter().map(|arg| eval(arg, ctx, res)).collect()
    };

    let mut acc: Option<f64> = None;
    for v in &values {
        if let Some(n) = as_f64(v) {
            acc = Some(match acc {
                Some(prev) => f(prev, n),
                None => n,
            });
        }
    }
    acc.map(number_value).unwrap_or(Value::Null)
}

fn string_pair<F>(args: &[Expr], ctx: &EvaluationContext, res: &mut Resolution, f: F) -> Value
where
    F: Fn(&str, &str) -> bool,
{
    let a = eval(&args[0], ctx, res);
    let b = eval(&args[1], ctx, res);
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => Value::Bool(f(a, b)),
        _ => Value::Bool(false),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flatten_paths(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => vec![],
    }
}

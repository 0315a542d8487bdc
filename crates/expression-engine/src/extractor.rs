//! 依赖提取器
//!
//! 从表达式树提取读依赖（变量路径集合），从效果描述符提取写依赖。
//! 结果使用有序集合，保证依赖图构建的确定性。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::Expr;

/// 提取表达式读取的全部变量路径（去重）
///
/// 递归访问每个节点：复合操作符（and/or/map/filter/if）的数组参数、
/// 二元/一元操作符、数组字面量都会被遍历。空路径（map/filter 的
/// 元素级自引用）不算变量依赖。
pub fn extract_reads(expr: &Expr) -> BTreeSet<String> {
    let mut reads = BTreeSet::new();
    collect_reads(expr, &mut reads);
    reads
}

fn collect_reads(expr: &Expr, reads: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var { path, .. } => {
            if !path.is_empty() {
                reads.insert(path.clone());
            }
        }
        Expr::Array(items) => {
            for item in items {
                collect_reads(item, reads);
            }
        }
        Expr::Op { args, .. } => {
            for arg in args {
                collect_reads(arg, reads);
            }
        }
    }
}

/// 效果描述符
///
/// 与表达式不同，效果是受限的非递归结构：一组目标路径写入声明。
/// 写提取因此不需要处理任意嵌套。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub targets: Vec<EffectTarget>,
}

/// 单个写入目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectTarget {
    /// 写入的变量路径
    pub path: String,
    #[serde(default)]
    pub op: EffectOp,
    /// 写入值（字面量或表达式 JSON，由求值方解释）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// 写入操作类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectOp {
    #[default]
    Set,
    Increment,
    Decrement,
}

/// 提取效果写入的全部变量路径（去重）
pub fn extract_writes(effect: &Effect) -> BTreeSet<String> {
    effect
        .targets
        .iter()
        .map(|t| t.path.clone())
        .collect()
}

//! 求值上下文
//!
//! 表达式通过点号路径从上下文 JSON 中读取变量。上下文在求值期间只读，
//! 求值器不会对其产生任何修改。

use serde_json::Value;

/// 求值上下文
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    data: Value,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 获取字段值（支持点号分隔的路径，如 "settlement.population"）
    ///
    /// 空路径返回整个上下文（map/filter 的元素级 lambda 依赖此行为）。
    /// 数组支持数字索引访问，如 "tags.0"。
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.data);
        }

        let mut current = &self.data;
        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

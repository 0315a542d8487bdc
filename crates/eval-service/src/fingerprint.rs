//! 求值指纹
//!
//! 缓存键的最后一段：对 (表达式, 上下文) 取 SHA-256。JSON 对象键
//! 先按字典序排序再序列化，同一逻辑输入无论字段书写顺序如何都得到
//! 同一个指纹。

use std::fmt::Write;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// 计算 (表达式, 上下文) 的十六进制指纹
pub fn fingerprint(expression: &Value, context: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(expression).as_bytes());
    // 分隔符, 避免 (a, bc) 与 (ab, c) 串接后同形
    hasher.update([0u8]);
    hasher.update(canonical(context).as_bytes());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// 键排序后的规范化 JSON 文本
fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable() {
        let expr = json!({">=": [{"var": "population"}, 5000]});
        let ctx = json!({"population": 6000});
        assert_eq!(fingerprint(&expr, &ctx), fingerprint(&expr, &ctx));
        assert_eq!(fingerprint(&expr, &ctx).len(), 64);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"population": 6000, "tags": ["coastal"]});
        let b = json!({"tags": ["coastal"], "population": 6000});
        let expr = json!({"var": "population"});
        assert_eq!(fingerprint(&expr, &a), fingerprint(&expr, &b));
    }

    #[test]
    fn test_different_context_different_fingerprint() {
        let expr = json!({"var": "population"});
        assert_ne!(
            fingerprint(&expr, &json!({"population": 6000})),
            fingerprint(&expr, &json!({"population": 6001}))
        );
    }

    #[test]
    fn test_array_order_matters() {
        let expr = json!({"var": "tags"});
        assert_ne!(
            fingerprint(&expr, &json!({"tags": ["a", "b"]})),
            fingerprint(&expr, &json!({"tags": ["b", "a"]}))
        );
    }
}

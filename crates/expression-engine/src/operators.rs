//! 表达式操作符定义
//!
//! 封闭集合：新增操作符必须在此枚举中声明，求值器对其穷尽匹配，
//! 漏实现会在编译期暴露。

use std::fmt;

/// 表达式操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // 逻辑
    And,
    Or,
    Not,

    // 比较
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,

    // 算术
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // 包含检查
    In,
    Missing,

    // 字符串
    Cat,
    StartsWith,
    EndsWith,

    // 复合
    If,
    Map,
    Filter,
    Min,
    Max,
}

impl Operator {
    /// 从 JSON 表达式中的操作符符号解析
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "and" => Self::And,
            "or" => Self::Or,
            "not" | "!" => Self::Not,
            "==" => Self::Eq,
            "!=" => Self::Neq,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "in" => Self::In,
            "missing" => Self::Missing,
            "cat" => Self::Cat,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "if" => Self::If,
            "map" => Self::Map,
            "filter" => Self::Filter,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        };
        Some(op)
    }

    /// 操作符在 JSON 表达式中的符号
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "!",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::In => "in",
            Self::Missing => "missing",
            Self::Cat => "cat",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::If => "if",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// 最少参数数量（解析期校验，求值期不再检查）
    pub fn min_args(&self) -> usize {
        match self {
            Self::And | Self::Or | Self::Cat | Self::Min | Self::Max | Self::Missing => 1,
            Self::Not => 1,
            Self::Eq
            | Self::Neq
            | Self::Lt
            | Self::Lte
            | Self::Gt
            | Self::Gte
            | Self::In
            | Self::StartsWith
            | Self::EndsWith
            | Self::Map
            | Self::Filter => 2,
            Self::Add | Self::Mul => 1,
            Self::Sub | Self::Div | Self::Mod => 1,
            Self::If => 2,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_roundtrip() {
        let ops = [
            Operator::And,
            Operator::Or,
            Operator::Eq,
            Operator::Gte,
            Operator::In,
            Operator::Map,
            Operator::If,
            Operator::Cat,
        ];
        for op in ops {
            assert_eq!(Operator::from_symbol(op.symbol()), Some(op));
        }
    }

    #[test]
    fn test_not_aliases() {
        assert_eq!(Operator::from_symbol("!"), Some(Operator::Not));
        assert_eq!(Operator::from_symbol("not"), Some(Operator::Not));
    }

    #[test]
    fn test_unknown_symbol() {
        assert_eq!(Operator::from_symbol("xor"), None);
        assert_eq!(Operator::from_symbol(""), None);
    }
}

//! 图查询响应 DTO

use serde::Serialize;

use crate::graph::{Edge, GraphStatistics, Node};

/// 整图快照响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraphView {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub statistics: GraphStatistics,
}

/// 环路校验响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub has_cycle: bool,
    /// 闭合环路路径（首尾为同一节点）
    pub cycles: Vec<Vec<String>>,
    pub message: String,
}

impl CycleReport {
    pub fn from_cycles(cycles: Vec<Vec<String>>) -> Self {
        let has_cycle = !cycles.is_empty();
        let message = if has_cycle {
            format!("检测到 {} 条环路", cycles.len())
        } else {
            "依赖图无环".to_string()
        };
        Self {
            has_cycle,
            cycles,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_report_serializes_camel_case() {
        let report = CycleReport::from_cycles(vec![vec![
            "condition:a".to_string(),
            "variable:x".to_string(),
            "condition:a".to_string(),
        ]]);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"hasCycle\":true"));
        assert!(json.contains("\"cycles\""));
    }

    #[test]
    fn test_empty_report_message() {
        let report = CycleReport::from_cycles(vec![]);
        assert!(!report.has_cycle);
        assert_eq!(report.message, "依赖图无环");
    }
}

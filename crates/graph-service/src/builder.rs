//! 依赖图构建器
//!
//! 从数据源全量拉取条件与变量并重建整张图。没有增量更新：
//! 任何变更后的重建都是从零开始，输入按稳定顺序处理，
//! 同一份数据两次构建产出完全相同的图。

use std::sync::Arc;

use async_trait::async_trait;
use campaign_shared::error::{CampaignError, Result};
use expression_engine::{Evaluator, extract_reads, extract_writes};
use serde_json::Value;
use tracing::{debug, warn};

use crate::graph::{CampaignGraph, EdgeKind, Node};
use crate::models::{
    CampaignKey, ConditionRecord, VariableRecord, condition_node_id, entity_node_id,
    root_variable, variable_node_id,
};

/// 图构建的数据源抽象
///
/// 生产实现走 PostgreSQL，测试用内存实现。
#[async_trait]
pub trait CampaignSource: Send + Sync {
    /// 拉取分支下激活的实例级条件
    async fn active_conditions(&self, key: &CampaignKey) -> Result<Vec<ConditionRecord>>;

    /// 拉取分支下战役作用域的变量
    async fn campaign_variables(&self, key: &CampaignKey) -> Result<Vec<VariableRecord>>;
}

/// 图构建器
pub struct GraphBuilder {
    source: Arc<dyn CampaignSource>,
    evaluator: Evaluator,
}

impl GraphBuilder {
    pub fn new(source: Arc<dyn CampaignSource>) -> Self {
        Self {
            source,
            evaluator: Evaluator::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.evaluator = Evaluator::new().with_max_depth(max_depth);
        self
    }

    /// 全量构建一张分支依赖图
    ///
    /// 变量按名称、条件按 ID 排序后依次入图。存储中的非法表达式
    /// 记 warn 并跳过该条件，不让单条脏数据拖垮整张图。
    pub async fn build(&self, key: &CampaignKey) -> Result<CampaignGraph> {
        let mut conditions = self.source.active_conditions(key).await?;
        let mut variables = self.source.campaign_variables(key).await?;

        conditions.retain(ConditionRecord::is_graph_participant);
        conditions.sort_by_key(|c| c.id);
        variables.retain(VariableRecord::is_graph_participant);
        variables.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = CampaignGraph::new(*key);

        for variable in &variables {
            graph.add_node(
                Node::variable(&variable.name).with_metadata("declared", Value::Bool(true)),
            );
        }

        for condition in &conditions {
            let expr = match self.evaluator.parse(&condition.expression) {
                Ok(expr) => expr,
                Err(e) => {
                    warn!(
                        condition_id = %condition.id,
                        error = %e,
                        "条件表达式非法, 跳过入图"
                    );
                    continue;
                }
            };

            let cond_id = condition_node_id(condition.id);
            graph.add_node(Node::condition(
                condition.id,
                &condition.name,
                condition.priority,
            ));

            if let Some(entity_id) = condition.entity_id {
                graph.add_node(Node::entity(entity_id, condition.entity_type.as_deref()));
                graph
                    .add_edge(&cond_id, &entity_node_id(entity_id), EdgeKind::DependsOn)
                    .map_err(CampaignError::from)?;
            }

            for path in extract_reads(&expr) {
                let name = root_variable(&path);
                ensure_variable(&mut graph, name);
                graph
                    .add_edge(&cond_id, &variable_node_id(name), EdgeKind::Reads)
                    .map_err(CampaignError::from)?;
            }

            if let Some(effect) = &condition.effect {
                for path in extract_writes(effect) {
                    let name = root_variable(&path);
                    ensure_variable(&mut graph, name);
                    graph
                        .add_edge(&variable_node_id(name), &cond_id, EdgeKind::Writes)
                        .map_err(CampaignError::from)?;
                }
            }
        }

        debug!(
            campaign_id = %key.campaign_id,
            branch_id = %key.branch_id,
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            "依赖图构建完成"
        );
        Ok(graph)
    }
}

/// 表达式引用了未声明的变量时补一个占位节点
fn ensure_variable(graph: &mut CampaignGraph, name: &str) {
    if !graph.has_node(&variable_node_id(name)) {
        graph.add_node(Node::variable(name).with_metadata("declared", Value::Bool(false)));
    }
}

//! 依赖图缓存服务
//!
//! 按 (campaign, branch) 维护不可变图快照，状态只有三种：
//! 缺失、构建中、已缓存。每个键一把异步互斥锁做 single-flight，
//! 并发读者只触发一次构建，其余等待同一结果；构建失败不缓存，
//! 槽位回到缺失态由下一个读者重试。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info};

use campaign_shared::error::{CampaignError, Result};

use crate::builder::GraphBuilder;
use crate::dto::{CycleReport, DependencyGraphView};
use crate::graph::{CampaignGraph, Node};
use crate::models::CampaignKey;

type Slot = Arc<Mutex<Option<Arc<CampaignGraph>>>>;

/// 图缓存服务
pub struct GraphCacheService {
    builder: GraphBuilder,
    slots: DashMap<CampaignKey, Slot>,
    builds: AtomicU64,
}

impl GraphCacheService {
    pub fn new(builder: GraphBuilder) -> Self {
        Self {
            builder,
            slots: DashMap::new(),
            builds: AtomicU64::new(0),
        }
    }

    /// 获取分支依赖图，缺失时构建并缓存
    ///
    /// 同一键上的并发未命中只有第一个调用者执行构建，后续调用者
    /// 阻塞在槽位锁上，拿到同一个 Arc 快照。
    pub async fn get_graph(&self, key: &CampaignKey) -> Result<Arc<CampaignGraph>> {
        let slot = self
            .slots
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if let Some(graph) = guard.as_ref() {
            counter!("graph_cache_hits_total").increment(1);
            return Ok(graph.clone());
        }

        counter!("graph_cache_misses_total").increment(1);
        debug!(campaign_id = %key.campaign_id, branch_id = %key.branch_id, "依赖图缺失, 开始构建");
        // 失败不写槽位, 状态回到缺失
        let graph = Arc::new(self.builder.build(key).await?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        *guard = Some(graph.clone());
        Ok(graph)
    }

    /// 使指定分支的缓存失效
    ///
    /// 直接移除槽位；正在构建中的请求仍会完成并服务其等待者
    /// （它们看到的是失效前的视图），之后的新请求触发重建。
    pub fn invalidate(&self, key: &CampaignKey) {
        if self.slots.remove(key).is_some() {
            counter!("graph_cache_invalidations_total").increment(1);
            info!(campaign_id = %key.campaign_id, branch_id = %key.branch_id, "依赖图缓存已失效");
        }
    }

    /// 累计构建次数，供监控与测试断言
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// 节点的直接依赖
    pub async fn dependencies_of(&self, key: &CampaignKey, node_id: &str) -> Result<Vec<Node>> {
        let graph = self.get_graph(key).await?;
        let nodes = graph.dependencies_of(node_id).map_err(CampaignError::from)?;
        Ok(nodes.into_iter().cloned().collect())
    }

    /// 依赖该节点的节点
    pub async fn dependents_of(&self, key: &CampaignKey, node_id: &str) -> Result<Vec<Node>> {
        let graph = self.get_graph(key).await?;
        let nodes = graph.dependents_of(node_id).map_err(CampaignError::from)?;
        Ok(nodes.into_iter().cloned().collect())
    }

    /// 环路校验报告
    pub async fn validate(&self, key: &CampaignKey) -> Result<CycleReport> {
        let graph = self.get_graph(key).await?;
        Ok(CycleReport::from_cycles(graph.detect_cycles()))
    }

    /// 全图求值顺序，存在环路时报错并携带环路路径
    pub async fn evaluation_order(&self, key: &CampaignKey) -> Result<Vec<String>> {
        let graph = self.get_graph(key).await?;
        Ok(graph.topological_sort().map_err(CampaignError::from)?)
    }

    /// 整图快照（节点、边、统计）
    pub async fn snapshot(&self, key: &CampaignKey) -> Result<DependencyGraphView> {
        let graph = self.get_graph(key).await?;
        Ok(DependencyGraphView {
            nodes: graph.nodes().to_vec(),
            edges: graph.edges().to_vec(),
            statistics: graph.statistics(),
        })
    }
}

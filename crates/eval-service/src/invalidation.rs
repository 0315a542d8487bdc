//! 缓存失效
//!
//! 写路径：条件/变量变更后通过 `MutationNotifier` 广播失效消息。
//! 读路径：每个实例启动一个监听任务，收到消息后丢弃对应
//! (campaign, branch) 的依赖图缓存和求值结果缓存作用域。
//! 发布者自己也通过订阅收到消息并执行同样的本地失效。
//!
//! 不参与依赖图的变更不广播：类型级条件（未绑定实体实例）和
//! 世界作用域变量的修改对分支图与分支内求值结果没有影响。

use std::sync::Arc;

use campaign_shared::error::Result;
use campaign_shared::pubsub::{
    InvalidationMessage, InvalidationPublisher, InvalidationSubscriber,
};
use graph_service::{CampaignKey, GraphCacheService, VariableScope};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::result_cache::ResultCacheBackend;

/// 变更通知器
pub struct MutationNotifier {
    publisher: Arc<dyn InvalidationPublisher>,
    instance_id: String,
}

impl MutationNotifier {
    pub fn new(publisher: Arc<dyn InvalidationPublisher>, instance_id: impl Into<String>) -> Self {
        Self {
            publisher,
            instance_id: instance_id.into(),
        }
    }

    /// 条件发生变更（创建/修改/停用/删除）
    ///
    /// 类型级条件（entity_id 为空）不入图，跳过广播。
    pub async fn condition_changed(
        &self,
        key: &CampaignKey,
        entity_id: Option<Uuid>,
    ) -> Result<()> {
        if entity_id.is_none() {
            debug!(campaign_id = %key.campaign_id, "类型级条件变更, 不触发失效");
            return Ok(());
        }
        self.broadcast(key).await
    }

    /// 变量发生变更（声明/删除/作用域调整）
    ///
    /// 世界作用域变量不属于任何分支图，跳过广播。
    pub async fn variable_changed(&self, key: &CampaignKey, scope: VariableScope) -> Result<()> {
        if scope == VariableScope::World {
            debug!(campaign_id = %key.campaign_id, "世界作用域变量变更, 不触发失效");
            return Ok(());
        }
        self.broadcast(key).await
    }

    /// 无条件广播一条失效消息（手动失效入口也走这里）
    pub async fn broadcast(&self, key: &CampaignKey) -> Result<()> {
        let message =
            InvalidationMessage::new(key.campaign_id, key.branch_id, self.instance_id.clone());
        self.publisher.publish(&message).await?;
        counter!("invalidation_messages_published_total").increment(1);
        Ok(())
    }
}

/// 启动失效监听任务
///
/// 订阅建立后返回任务句柄；任务在订阅通道关闭时退出。
pub async fn start_invalidation_listener(
    subscriber: &dyn InvalidationSubscriber,
    graphs: Arc<GraphCacheService>,
    results: Arc<dyn ResultCacheBackend>,
) -> Result<JoinHandle<()>> {
    let mut rx = subscriber.subscribe().await?;
    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            apply(&graphs, results.as_ref(), &message).await;
        }
        info!("失效订阅通道关闭, 监听任务退出");
    });
    Ok(handle)
}

async fn apply(
    graphs: &GraphCacheService,
    results: &dyn ResultCacheBackend,
    message: &InvalidationMessage,
) {
    let key = CampaignKey::new(message.campaign_id, message.branch_id);
    graphs.invalidate(&key);

    match results
        .remove_scope(
            &message.campaign_id.to_string(),
            &message.branch_id.to_string(),
        )
        .await
    {
        Ok(dropped) => debug!(
            message_id = %message.message_id,
            origin = %message.origin,
            dropped,
            "失效消息已应用"
        ),
        // 作用域删除失败时由 TTL 兜底陈旧上界
        Err(e) => warn!(
            message_id = %message.message_id,
            error = %e,
            "结果缓存作用域删除失败"
        ),
    }
    counter!("invalidation_messages_applied_total").increment(1);
}

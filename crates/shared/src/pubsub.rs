//! 失效广播（pub/sub）抽象
//!
//! 条件/变量发生变更后，变更发生的实例向共享频道广播一条
//! `InvalidationMessage`，所有实例（包括发布者自己）收到后丢弃对应
//! (campaign, branch) 作用域的缓存。投递语义为 at-least-once 且
//! fire-and-forget：允许短暂陈旧窗口，陈旧上界由结果缓存 TTL 保证。
//!
//! 广播机制通过 `InvalidationPublisher` / `InvalidationSubscriber` trait
//! 抽象，生产环境使用 Redis pub/sub，测试使用进程内广播总线，
//! 失效逻辑本身不感知底层通道。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;

/// 失效消息
///
/// 作用域是 (campaign, branch)；`origin` 标识发布实例，仅用于日志排查，
/// 接收方不区分消息来源（发布者自己也要丢弃本地缓存）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    /// 消息唯一标识（UUID v7，时间有序便于日志关联）
    pub message_id: String,
    pub campaign_id: Uuid,
    pub branch_id: Uuid,
    /// 发布实例标识
    pub origin: String,
    pub issued_at: DateTime<Utc>,
}

impl InvalidationMessage {
    pub fn new(campaign_id: Uuid, branch_id: Uuid, origin: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::now_v7().to_string(),
            campaign_id,
            branch_id,
            origin: origin.into(),
            issued_at: Utc::now(),
        }
    }
}

/// 失效消息发布端
#[async_trait]
pub trait InvalidationPublisher: Send + Sync {
    /// 发布一条失效消息（fire-and-forget，失败由调用方决定是否降级）
    async fn publish(&self, message: &InvalidationMessage) -> Result<()>;
}

/// 失效消息订阅端
///
/// `subscribe` 返回一个接收通道，调用方在独立任务中循环消费。
#[async_trait]
pub trait InvalidationSubscriber: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<InvalidationMessage>>;
}

// ---------------------------------------------------------------------------
// Redis pub/sub 实现（生产环境）
// ---------------------------------------------------------------------------

/// 基于 Redis pub/sub 的失效广播
#[derive(Clone)]
pub struct RedisBroadcast {
    cache: Cache,
    channel: String,
}

impl RedisBroadcast {
    pub fn new(cache: Cache, channel: impl Into<String>) -> Self {
        Self {
            cache,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl InvalidationPublisher for RedisBroadcast {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self
            .cache
            .client()
            .get_multiplexed_async_connection()
            .await?;
        let _: () = conn.publish(&self.channel, payload).await?;
        debug!(
            campaign_id = %message.campaign_id,
            branch_id = %message.branch_id,
            "失效消息已广播"
        );
        Ok(())
    }
}

#[async_trait]
impl InvalidationSubscriber for RedisBroadcast {
    async fn subscribe(&self) -> Result<mpsc::Receiver<InvalidationMessage>> {
        let mut pubsub = self.cache.client().get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("失效消息负载读取失败: {e}");
                        continue;
                    }
                };
                match serde_json::from_str::<InvalidationMessage>(&payload) {
                    Ok(parsed) => {
                        if tx.send(parsed).await.is_err() {
                            // 接收端已关闭，订阅任务退出
                            break;
                        }
                    }
                    Err(e) => warn!("失效消息解析失败: {e}"),
                }
            }
        });

        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// 进程内广播实现（测试/单实例部署）
// ---------------------------------------------------------------------------

/// 进程内广播总线
///
/// 用 tokio broadcast 通道模拟共享频道，多个服务实例句柄共享同一个
/// 总线即可在测试中验证跨实例失效行为。
#[derive(Clone)]
pub struct InProcessBus {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl InProcessBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationPublisher for InProcessBus {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        // 没有订阅者时 send 返回错误，广播语义下这不算失败
        let _ = self.sender.send(message.clone());
        Ok(())
    }
}

#[async_trait]
impl InvalidationSubscriber for InProcessBus {
    async fn subscribe(&self) -> Result<mpsc::Receiver<InvalidationMessage>> {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("进程内总线滞后，丢弃 {n} 条失效消息");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

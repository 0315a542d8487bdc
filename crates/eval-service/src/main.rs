//! 规则求值服务入口

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campaign_shared::cache::Cache;
use campaign_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use campaign_shared::config::AppConfig;
use campaign_shared::observability;
use campaign_shared::pubsub::RedisBroadcast;
use graph_service::{GraphBuilder, GraphCacheService, PgCampaignSource};
use rules_eval_service::expression_source::PgExpressionSource;
use rules_eval_service::http::{AppState, router};
use rules_eval_service::invalidation::{MutationNotifier, start_invalidation_listener};
use rules_eval_service::result_cache::{RedisResultCache, ResultCacheBackend};
use rules_eval_service::service::RulesEvaluationService;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use uuid::Uuid;

const SERVICE_NAME: &str = "rules-eval-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).context("配置加载失败")?;
    observability::init(&config.observability);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .connect(&config.database.url)
        .await
        .context("数据库连接失败")?;
    info!("数据库连接池已就绪");

    let cache = Cache::new(&config.redis)?;
    cache.health_check().await.context("Redis 连接检查失败")?;

    let graphs = Arc::new(GraphCacheService::new(
        GraphBuilder::new(Arc::new(PgCampaignSource::new(pool.clone())))
            .with_max_depth(config.evaluation.max_expression_depth),
    ));

    let results: Arc<dyn ResultCacheBackend> = Arc::new(RedisResultCache::new(cache.clone()));
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("redis-eval-cache")
            .with_failure_threshold(config.evaluation.breaker_failure_threshold)
            .with_recovery_timeout(Duration::from_secs(
                config.evaluation.breaker_recovery_seconds,
            )),
    );
    let service = Arc::new(
        RulesEvaluationService::new(
            results.clone(),
            breaker,
            Duration::from_secs(config.evaluation.result_ttl_seconds),
        )
        .with_max_depth(config.evaluation.max_expression_depth)
        .with_expression_source(Arc::new(PgExpressionSource::new(pool))),
    );

    let broadcast = RedisBroadcast::new(cache, &config.redis.invalidation_channel);
    let instance_id = format!("{SERVICE_NAME}-{}", Uuid::now_v7());
    let notifier = Arc::new(MutationNotifier::new(
        Arc::new(broadcast.clone()),
        instance_id.clone(),
    ));
    let _listener = start_invalidation_listener(&broadcast, graphs.clone(), results).await?;
    info!(instance_id = %instance_id, "失效监听任务已启动");

    let app = router(AppState {
        service,
        graphs,
        notifier,
    });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听地址绑定失败: {addr}"))?;
    info!(addr = %addr, "规则求值服务启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("服务已退出");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "关闭信号监听失败");
    }
    info!("收到关闭信号, 开始优雅停机");
}

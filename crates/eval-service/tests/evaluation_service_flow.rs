//! 求值服务集成测试
//!
//! 覆盖结果缓存 TTL、熔断降级，以及两个服务实例通过共享广播总线
//! 的跨实例失效（发布者自己也失效）。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use campaign_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use campaign_shared::error::{CampaignError, Result};
use campaign_shared::pubsub::InProcessBus;
use graph_service::{
    CampaignKey, CampaignSource, ConditionRecord, GraphBuilder, GraphCacheService,
    VariableRecord, VariableScope,
};
use rules_eval_service::{
    CachedEvaluation, EvaluateRequest, ManualClock, MemoryResultCache, MutationNotifier,
    ResultCacheBackend, RulesEvaluationService, start_invalidation_listener,
};
use serde_json::{Value, json};
use uuid::Uuid;

fn request(key: &CampaignKey, expression: Value, context: Value) -> EvaluateRequest {
    EvaluateRequest::inline(key.campaign_id, key.branch_id, expression, context)
}

fn breaker(name: &str) -> CircuitBreaker {
    CircuitBreaker::new(
        CircuitBreakerConfig::new(name)
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(3600)),
    )
}

#[tokio::test]
async fn cached_result_expires_after_ttl() {
    let clock = Arc::new(ManualClock::new());
    let svc = RulesEvaluationService::new(
        Arc::new(MemoryResultCache::with_clock(clock.clone())),
        breaker("ttl-test"),
        Duration::from_secs(300),
    );
    let key = CampaignKey::new(Uuid::now_v7(), Uuid::now_v7());
    let req = request(
        &key,
        json!({">=": [{"var": "population"}, 5000]}),
        json!({"population": 6000}),
    );

    assert!(!svc.evaluate(&req).await.unwrap().cached);
    assert!(svc.evaluate(&req).await.unwrap().cached);

    // TTL 到期后重新求值并回填
    clock.advance(Duration::from_secs(301));
    assert!(!svc.evaluate(&req).await.unwrap().cached);
    assert!(svc.evaluate(&req).await.unwrap().cached);
}

/// 始终失败的缓存后端
struct FailingBackend {
    calls: AtomicU64,
}

impl FailingBackend {
    fn err() -> CampaignError {
        CampaignError::BackendUnavailable {
            service: "redis".to_string(),
        }
    }
}

#[async_trait]
impl ResultCacheBackend for FailingBackend {
    async fn get(&self, _: &str, _: &str, _: &str) -> Result<Option<CachedEvaluation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Self::err())
    }

    async fn set(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &CachedEvaluation,
        _: Duration,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Self::err())
    }

    async fn remove_scope(&self, _: &str, _: &str) -> Result<u64> {
        Err(Self::err())
    }
}

#[tokio::test]
async fn breaker_trips_and_service_keeps_answering() {
    let backend = Arc::new(FailingBackend {
        calls: AtomicU64::new(0),
    });
    let svc = RulesEvaluationService::new(backend.clone(), breaker("breaker-test"), Duration::from_secs(300));
    let key = CampaignKey::new(Uuid::now_v7(), Uuid::now_v7());
    let req = request(
        &key,
        json!({">": [{"var": "gold"}, 100]}),
        json!({"gold": 500}),
    );

    // 第一次: 读失败 + 写失败, 达到阈值跳闸, 结果仍然正确
    let first = svc.evaluate(&req).await.unwrap();
    assert!(first.truthy);
    assert!(!first.cached);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(svc.breaker().state(), CircuitState::Open);

    // 跳闸后不再触碰后端, 直接求值
    let second = svc.evaluate(&req).await.unwrap();
    assert!(second.truthy);
    assert!(!second.cached);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

/// 跨实例失效测试用的内存数据源
struct StaticSource {
    variables: Vec<VariableRecord>,
}

#[async_trait]
impl CampaignSource for StaticSource {
    async fn active_conditions(&self, _key: &CampaignKey) -> Result<Vec<ConditionRecord>> {
        Ok(vec![])
    }

    async fn campaign_variables(&self, _key: &CampaignKey) -> Result<Vec<VariableRecord>> {
        Ok(self.variables.clone())
    }
}

struct Instance {
    service: RulesEvaluationService,
    results: Arc<MemoryResultCache>,
    graphs: Arc<GraphCacheService>,
}

async fn spawn_instance(bus: &InProcessBus, name: &str) -> Instance {
    let results = Arc::new(MemoryResultCache::new());
    let graphs = Arc::new(GraphCacheService::new(GraphBuilder::new(Arc::new(
        StaticSource {
            variables: vec![VariableRecord {
                id: Uuid::now_v7(),
                name: "gold".to_string(),
                scope: VariableScope::Campaign,
                value: json!(0),
                version: 1,
                deleted_at: None,
            }],
        },
    ))));
    let backend: Arc<dyn ResultCacheBackend> = results.clone();
    start_invalidation_listener(bus, graphs.clone(), backend)
        .await
        .unwrap();
    Instance {
        service: RulesEvaluationService::new(
            results.clone(),
            breaker(name),
            Duration::from_secs(300),
        ),
        results,
        graphs,
    }
}

#[tokio::test]
async fn mutation_invalidates_all_instances_including_publisher() {
    let bus = InProcessBus::new();
    let a = spawn_instance(&bus, "instance-a").await;
    let b = spawn_instance(&bus, "instance-b").await;
    let key = CampaignKey::new(Uuid::now_v7(), Uuid::now_v7());

    // 两个实例各自填充结果缓存与图缓存
    let req = request(&key, json!({"var": "gold"}), json!({"gold": 10}));
    a.service.evaluate(&req).await.unwrap();
    b.service.evaluate(&req).await.unwrap();
    a.graphs.get_graph(&key).await.unwrap();
    b.graphs.get_graph(&key).await.unwrap();
    assert_eq!(a.results.len(), 1);
    assert_eq!(b.results.len(), 1);

    // 实例 A 上发生条件变更
    let notifier = MutationNotifier::new(Arc::new(bus.clone()), "instance-a");
    notifier
        .condition_changed(&key, Some(Uuid::now_v7()))
        .await
        .unwrap();

    // 等待广播送达两个实例（含发布者自己）
    let mut drained = false;
    for _ in 0..100 {
        if a.results.is_empty() && b.results.is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drained, "两个实例的结果缓存都应被清空");

    // 图缓存也被丢弃, 下次访问触发重建
    let before = (a.graphs.build_count(), b.graphs.build_count());
    a.graphs.get_graph(&key).await.unwrap();
    b.graphs.get_graph(&key).await.unwrap();
    assert_eq!(a.graphs.build_count(), before.0 + 1);
    assert_eq!(b.graphs.build_count(), before.1 + 1);
}

#[tokio::test]
async fn invalidation_scoped_to_single_branch() {
    let bus = InProcessBus::new();
    let inst = spawn_instance(&bus, "instance-a").await;
    let campaign = Uuid::now_v7();
    let key_a = CampaignKey::new(campaign, Uuid::now_v7());
    let key_b = CampaignKey::new(campaign, Uuid::now_v7());

    inst.service
        .evaluate(&request(&key_a, json!({"var": "gold"}), json!({"gold": 1})))
        .await
        .unwrap();
    inst.service
        .evaluate(&request(&key_b, json!({"var": "gold"}), json!({"gold": 2})))
        .await
        .unwrap();
    assert_eq!(inst.results.len(), 2);

    let notifier = MutationNotifier::new(Arc::new(bus.clone()), "instance-a");
    notifier
        .variable_changed(&key_a, VariableScope::Campaign)
        .await
        .unwrap();

    let mut scoped = false;
    for _ in 0..100 {
        if inst.results.len() == 1 {
            scoped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scoped, "只有 key_a 作用域被清空, key_b 保留");
}

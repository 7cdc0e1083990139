use crate::bus::{EventBus, Subscription};
use crate::config::EngineConfig;
use crate::engine::{PushOutcome, Rule, StageRegistry};
use crate::registry::RuleRegistry;
use crate::types::{BrokerEvent, RuleContext, RuleError, RuleStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 执行器依赖, 由引擎创建并共享给所有执行器
#[derive(Clone)]
pub(crate) struct ExecutorDeps {
    pub config: Arc<EngineConfig>,
    pub registry: Arc<dyn RuleRegistry>,
    pub bus: Arc<dyn EventBus>,
    pub stages: Arc<StageRegistry>,
}

type RuleTable = Arc<RwLock<HashMap<String, Rule>>>;

struct ExecutorWorker {
    topic: String,
    cancel: CancellationToken,
    relay: JoinHandle<()>,
    drain: JoinHandle<()>,
}

/// 单个产品的规则执行器
///
/// 所有方法只由引擎循环调用; 规则表另外加锁, 因为事件消费任务会并发读取
pub struct RuleExecutor {
    product_id: String,
    tenant_id: String,
    rules: RuleTable,
    deps: ExecutorDeps,
    worker: Option<ExecutorWorker>,
}

impl RuleExecutor {
    /// 创建执行器, 租户在创建时解析一次
    pub(crate) async fn create(product_id: &str, deps: ExecutorDeps) -> Result<Self, RuleError> {
        let product = deps.registry.get_product(product_id).await?;
        debug!(product_id, tenant_id = %product.tenant_id, "rule executor created");
        Ok(Self {
            product_id: product_id.to_string(),
            tenant_id: product.tenant_id,
            rules: Arc::new(RwLock::new(HashMap::new())),
            deps,
            worker: None,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// 租户事件订阅是否已经建立
    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// 订阅租户事件主题并启动转发与执行任务, 重复调用无副作用
    pub async fn start(&mut self) -> Result<(), RuleError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let topic = self.deps.config.event_topic(&self.tenant_id);
        let subscription = self.deps.bus.subscribe(&topic).await?;
        let (tx, rx) = mpsc::channel(self.deps.config.event_queue_capacity);
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(relay_events(
            self.product_id.clone(),
            subscription,
            tx,
            cancel.clone(),
        ));
        let drain = tokio::spawn(drain_events(
            self.product_id.clone(),
            self.rules.clone(),
            rx,
            self.deps.config.rule_timeout,
            cancel.clone(),
        ));

        info!(product_id = %self.product_id, topic = %topic, "rule executor started");
        self.worker = Some(ExecutorWorker {
            topic,
            cancel,
            relay,
            drain,
        });
        Ok(())
    }

    /// 关闭订阅并等待内部任务退出, 重复调用无副作用
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.relay.await {
            error!(product_id = %self.product_id, "event relay task failed: {}", e);
        }
        if let Err(e) = worker.drain.await {
            error!(product_id = %self.product_id, "rule worker task failed: {}", e);
        }
        info!(product_id = %self.product_id, topic = %worker.topic, "rule executor stopped");
    }

    pub async fn create_rule(&mut self, ctx: &RuleContext) -> Result<(), RuleError> {
        if self.rules.read().await.contains_key(&ctx.rule_name) {
            return Err(RuleError::Duplicate(ctx.rule_name.clone()));
        }

        let definition = self
            .deps
            .registry
            .get_rule(&ctx.product_id, &ctx.rule_name)
            .await?;
        let rule = Rule::build(definition, &self.deps.stages).await?;

        // 已持久化为 started 的规则需要事件订阅
        if rule.is_started() {
            self.start().await?;
        }
        self.rules.write().await.insert(ctx.rule_name.clone(), rule);
        info!(product_id = %self.product_id, rule_name = %ctx.rule_name, "rule created");
        Ok(())
    }

    pub async fn remove_rule(&mut self, ctx: &RuleContext) -> Result<(), RuleError> {
        self.rules
            .write()
            .await
            .remove(&ctx.rule_name)
            .ok_or_else(|| RuleError::NotFound(ctx.rule_name.clone()))?;
        info!(product_id = %self.product_id, rule_name = %ctx.rule_name, "rule removed");
        Ok(())
    }

    /// 重新加载规则定义并重建流水线
    pub async fn update_rule(&mut self, ctx: &RuleContext) -> Result<(), RuleError> {
        if !self.rules.read().await.contains_key(&ctx.rule_name) {
            return Err(RuleError::NotFound(ctx.rule_name.clone()));
        }

        let definition = self
            .deps
            .registry
            .get_rule(&ctx.product_id, &ctx.rule_name)
            .await?;
        let rule = Rule::build(definition, &self.deps.stages).await?;

        if rule.is_started() {
            self.start().await?;
        }
        self.rules.write().await.insert(ctx.rule_name.clone(), rule);
        info!(product_id = %self.product_id, rule_name = %ctx.rule_name, "rule updated");
        Ok(())
    }

    pub async fn start_rule(&mut self, ctx: &RuleContext) -> Result<(), RuleError> {
        if !self.rules.read().await.contains_key(&ctx.rule_name) {
            return Err(RuleError::NotFound(ctx.rule_name.clone()));
        }

        self.start().await?;

        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(&ctx.rule_name)
            .ok_or_else(|| RuleError::NotFound(ctx.rule_name.clone()))?;
        rule.start();
        info!(product_id = %self.product_id, rule_name = %ctx.rule_name, "rule started");
        Ok(())
    }

    pub async fn stop_rule(&mut self, ctx: &RuleContext) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(&ctx.rule_name)
            .ok_or_else(|| RuleError::NotFound(ctx.rule_name.clone()))?;
        rule.stop();
        info!(product_id = %self.product_id, rule_name = %ctx.rule_name, "rule stopped");
        Ok(())
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// 规则名称与状态, 按名称排序
    pub async fn snapshot(&self) -> Vec<(String, RuleStatus)> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .await
            .values()
            .map(|r| (r.name().to_string(), r.status()))
            .collect();
        rules.sort_by(|a, b| a.0.cmp(&b.0));
        rules
    }
}

/// 订阅转发: 只负责入队, 队列满时丢弃事件
async fn relay_events(
    product_id: String,
    mut subscription: Subscription,
    queue: mpsc::Sender<BrokerEvent>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = subscription.recv() => match payload {
                Some(payload) => payload,
                None => {
                    warn!(product_id = %product_id, topic = subscription.topic(), "event subscription closed");
                    break;
                }
            },
        };

        let event = match BrokerEvent::decode(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(product_id = %product_id, "malformed broker event: {}", e);
                continue;
            }
        };
        // 同一租户主题上可能有其他产品的事件
        if event.product_id != product_id || !event.is_publish() {
            continue;
        }

        match queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    product_id = %product_id,
                    topic = %event.topic,
                    "event queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

/// 执行任务: 对每个事件依次执行所有已启动的规则, 单条规则的错误只记录日志
async fn drain_events(
    product_id: String,
    rules: RuleTable,
    mut queue: mpsc::Receiver<BrokerEvent>,
    rule_timeout: Option<Duration>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        // 不持锁执行流水线
        let started: Vec<Rule> = rules
            .read()
            .await
            .values()
            .filter(|r| r.is_started())
            .cloned()
            .collect();

        for rule in started {
            let result = match rule_timeout {
                Some(limit) => tokio::time::timeout(limit, rule.handle(&event))
                    .await
                    .unwrap_or_else(|_| Err(RuleError::Timeout(rule.name().to_string()))),
                None => rule.handle(&event).await,
            };
            match result {
                Ok(PushOutcome::NoData) => {}
                Ok(PushOutcome::Loaded(n)) => {
                    debug!(product_id = %product_id, rule_name = rule.name(), loaders = n, "event processed");
                }
                Err(e) => {
                    warn!(
                        product_id = %product_id,
                        rule_name = rule.name(),
                        topic = %event.topic,
                        "rule execution failed: {}",
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::registry::InMemoryRegistry;
    use crate::types::{DataProcess, DataTarget, Product, RuleAction, RuleDefinition};

    async fn deps(bus: InMemoryBus, registry: InMemoryRegistry) -> ExecutorDeps {
        let bus: Arc<dyn EventBus> = Arc::new(bus);
        ExecutorDeps {
            config: Arc::new(EngineConfig::default()),
            registry: Arc::new(registry),
            stages: Arc::new(StageRegistry::with_builtin(bus.clone())),
            bus,
        }
    }

    async fn seeded_registry() -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        registry.put_product(Product::new("p1", "tenant-a")).await.unwrap();
        registry
            .put_rule(RuleDefinition::new(
                "p1",
                "r1",
                DataProcess::new("t", "", &[]),
                DataTarget::topic("out"),
            ))
            .await
            .unwrap();
        registry
    }

    fn ctx(rule: &str, action: RuleAction) -> RuleContext {
        RuleContext::new("p1", rule, action)
    }

    #[tokio::test]
    async fn unknown_product_cannot_create_executor() {
        let deps = deps(InMemoryBus::new(), InMemoryRegistry::new()).await;
        assert!(matches!(
            RuleExecutor::create("missing", deps).await,
            Err(RuleError::ProductNotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscription_starts_on_first_rule_start() {
        let bus = InMemoryBus::new();
        let deps = deps(bus.clone(), seeded_registry().await).await;
        let mut executor = RuleExecutor::create("p1", deps).await.unwrap();
        assert_eq!(executor.tenant_id(), "tenant-a");

        executor.create_rule(&ctx("r1", RuleAction::Create)).await.unwrap();
        assert!(!executor.is_started());
        assert_eq!(bus.subscriber_count("broker-event-tenant-a").await, 0);

        executor.start_rule(&ctx("r1", RuleAction::Start)).await.unwrap();
        executor.start_rule(&ctx("r1", RuleAction::Start)).await.unwrap();
        assert!(executor.is_started());
        assert_eq!(bus.subscriber_count("broker-event-tenant-a").await, 1);

        executor.stop().await;
        executor.stop().await;
        assert!(!executor.is_started());
        assert_eq!(bus.subscriber_count("broker-event-tenant-a").await, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_events_without_blocking_relay() {
        let bus = InMemoryBus::new();
        let subscription = bus.subscribe("broker-event-tenant-a").await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let relay = tokio::spawn(relay_events("p1".to_string(), subscription, tx, cancel.clone()));

        for n in 0..3 {
            let payload = format!(r#"{{"n":{}}}"#, n);
            let event = BrokerEvent::publish("dev-1", "p1", "t", payload.as_bytes());
            bus.publish("broker-event-tenant-a", event.encode().unwrap())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 队列满时转发任务仍能响应取消
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .expect("relay task blocked on a full queue")
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload, br#"{"n":0}"#.to_vec());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn rule_table_operations() {
        let deps = deps(InMemoryBus::new(), seeded_registry().await).await;
        let mut executor = RuleExecutor::create("p1", deps).await.unwrap();

        executor.create_rule(&ctx("r1", RuleAction::Create)).await.unwrap();
        assert!(matches!(
            executor.create_rule(&ctx("r1", RuleAction::Create)).await,
            Err(RuleError::Duplicate(_))
        ));
        assert_eq!(executor.rule_count().await, 1);

        let err = executor.start_rule(&ctx("nope", RuleAction::Start)).await.unwrap_err();
        assert_eq!(err.to_string(), "rule 'nope' doesn't exist");
        assert!(!executor.is_started());

        executor.update_rule(&ctx("r1", RuleAction::Update)).await.unwrap();
        executor.stop_rule(&ctx("r1", RuleAction::Stop)).await.unwrap();
        assert_eq!(executor.snapshot().await, vec![("r1".to_string(), RuleStatus::Idle)]);

        executor.remove_rule(&ctx("r1", RuleAction::Remove)).await.unwrap();
        assert!(matches!(
            executor.remove_rule(&ctx("r1", RuleAction::Remove)).await,
            Err(RuleError::NotFound(_))
        ));
        assert!(matches!(
            executor.update_rule(&ctx("r1", RuleAction::Update)).await,
            Err(RuleError::NotFound(_))
        ));
        assert_eq!(executor.rule_count().await, 0);
    }
}

use crate::bus::{EventBus, Subscription};
use crate::config::EngineConfig;
use crate::engine::executor::{ExecutorDeps, RuleExecutor};
use crate::engine::StageRegistry;
use crate::registry::RuleRegistry;
use crate::types::{RuleAction, RuleContext, RuleError, RuleNotification, RuleStatus};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 产品 -> (规则 -> 状态)
pub type EngineSnapshot = BTreeMap<String, BTreeMap<String, RuleStatus>>;

enum EngineCommand {
    Rule(RuleContext),
    Snapshot(oneshot::Sender<EngineSnapshot>),
}

/// 规则引擎: 拥有全部执行器, 是规则生命周期命令的唯一入口
///
/// 所有命令、通知和空闲清理都在同一个循环里顺序处理,
/// 因此同一产品的命令按提交顺序生效, 且不会与清理并发
pub struct RuleEngine {
    deps: ExecutorDeps,
    commands: mpsc::Sender<EngineCommand>,
    inbox: Mutex<Option<mpsc::Receiver<EngineCommand>>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RuleEngine {
    pub fn new(config: EngineConfig, registry: Arc<dyn RuleRegistry>, bus: Arc<dyn EventBus>) -> Self {
        let stages = StageRegistry::with_builtin(bus.clone());
        Self::with_stages(config, registry, bus, stages)
    }

    /// 使用自定义加载器注册表创建引擎
    pub fn with_stages(
        config: EngineConfig,
        registry: Arc<dyn RuleRegistry>,
        bus: Arc<dyn EventBus>,
        stages: StageRegistry,
    ) -> Self {
        let (commands, inbox) = mpsc::channel(config.command_capacity);
        Self {
            deps: ExecutorDeps {
                config: Arc::new(config),
                registry,
                bus,
                stages: Arc::new(stages),
            },
            commands,
            inbox: Mutex::new(Some(inbox)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<dyn RuleRegistry> {
        self.deps.registry.clone()
    }

    /// 订阅规则通知主题并启动处理循环; 订阅失败时返回错误
    pub async fn start(&self) -> Result<(), RuleError> {
        // 停止后不支持重新启动
        if self.cancel.is_cancelled() {
            return Err(RuleError::EngineStopped);
        }
        let mut inbox = self.inbox.lock().await;
        let Some(commands) = inbox.take() else {
            warn!("rule engine already started");
            return Ok(());
        };

        let notifications = match self.deps.bus.subscribe(&self.deps.config.notify_topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                *inbox = Some(commands);
                return Err(e);
            }
        };

        let engine_loop = EngineLoop {
            deps: self.deps.clone(),
            executors: HashMap::new(),
        };
        let handle = tokio::spawn(engine_loop.run(commands, notifications, self.cancel.clone()));
        *self.handle.lock().await = Some(handle);

        info!(
            notify_topic = %self.deps.config.notify_topic,
            sweep_interval = ?self.deps.config.idle_sweep_interval,
            "rule engine started"
        );
        Ok(())
    }

    /// 提交规则命令; 同步命令会等待引擎循环处理完成并返回结果
    pub async fn handle_rule(&self, mut ctx: RuleContext) -> Result<(), RuleError> {
        let reply = if ctx.sync {
            Some(ctx.attach_reply())
        } else {
            None
        };

        self.commands
            .send(EngineCommand::Rule(ctx))
            .await
            .map_err(|_| RuleError::EngineStopped)?;

        match reply {
            Some(reply) => reply.await.map_err(|_| RuleError::EngineStopped)?,
            None => Ok(()),
        }
    }

    /// 启动恢复: 对所有持久化为 started 的规则依次重放 create 和 start
    ///
    /// 单条规则恢复失败只记录日志, 返回成功恢复的规则数
    pub async fn recovery(&self) -> Result<usize, RuleError> {
        let rules = self
            .deps
            .registry
            .get_rules_with_status(RuleStatus::Started)
            .await?;
        if rules.is_empty() {
            return Ok(0);
        }

        let mut recovered = 0;
        'rules: for rule in &rules {
            for action in [RuleAction::Create, RuleAction::Start] {
                let ctx = RuleContext::synchronous(&rule.product_id, &rule.rule_name, action);
                if let Err(e) = self.handle_rule(ctx).await {
                    error!(
                        product_id = %rule.product_id,
                        rule_name = %rule.rule_name,
                        action = %action,
                        "rule recovery failed: {}",
                        e
                    );
                    continue 'rules;
                }
            }
            recovered += 1;
        }

        info!(total = rules.len(), recovered, "rule recovery finished");
        Ok(recovered)
    }

    /// 当前全部执行器中的规则状态
    pub async fn snapshot(&self) -> Result<EngineSnapshot, RuleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Snapshot(tx))
            .await
            .map_err(|_| RuleError::EngineStopped)?;
        rx.await.map_err(|_| RuleError::EngineStopped)
    }

    /// 停止处理循环并停止全部执行器, 重复调用无副作用
    pub async fn stop(&self) {
        self.cancel.cancel();
        // 未启动时丢弃收件箱, 让等待中的调用方返回
        self.inbox.lock().await.take();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("rule engine loop failed: {}", e);
            }
        }
    }
}

struct EngineLoop {
    deps: ExecutorDeps,
    executors: HashMap<String, RuleExecutor>,
}

impl EngineLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        notifications: Subscription,
        cancel: CancellationToken,
    ) {
        let period = self.deps.config.idle_sweep_interval;
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut notifications = Some(notifications);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                payload = next_notification(&mut notifications) => match payload {
                    Some(payload) => self.handle_notification(&payload).await,
                    None => {
                        warn!("rule notification subscription closed");
                        notifications = None;
                    }
                },
                _ = sweep.tick() => self.sweep_idle().await,
            }
        }

        for (product_id, mut executor) in self.executors.drain() {
            debug!(product_id = %product_id, "stopping rule executor");
            executor.stop().await;
        }
        info!("rule engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Rule(ctx) => {
                let result = self.dispatch_rule(&ctx).await;
                ctx.complete(result);
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot().await);
            }
        }
    }

    async fn handle_notification(&mut self, payload: &[u8]) {
        let ctx = serde_json::from_slice::<RuleNotification>(payload)
            .map_err(RuleError::from)
            .and_then(RuleContext::try_from);
        match ctx {
            Ok(ctx) => {
                debug!(
                    product_id = %ctx.product_id,
                    rule_name = %ctx.rule_name,
                    action = %ctx.action,
                    "rule notification received"
                );
                let result = self.dispatch_rule(&ctx).await;
                ctx.complete(result);
            }
            Err(e) => warn!("invalid rule notification: {}", e),
        }
    }

    async fn dispatch_rule(&mut self, ctx: &RuleContext) -> Result<(), RuleError> {
        let executor = match self.executors.entry(ctx.product_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if ctx.action != RuleAction::Create {
                    return Err(RuleError::InvalidOperation {
                        product_id: ctx.product_id.clone(),
                        rule_name: ctx.rule_name.clone(),
                    });
                }
                let executor = RuleExecutor::create(&ctx.product_id, self.deps.clone()).await?;
                entry.insert(executor)
            }
        };

        match ctx.action {
            RuleAction::Create => executor.create_rule(ctx).await,
            RuleAction::Remove => executor.remove_rule(ctx).await,
            RuleAction::Update => executor.update_rule(ctx).await,
            RuleAction::Start => executor.start_rule(ctx).await,
            RuleAction::Stop => executor.stop_rule(ctx).await,
        }
    }

    /// 停止并移除没有规则的执行器
    async fn sweep_idle(&mut self) {
        let mut idle = Vec::new();
        for (product_id, executor) in &self.executors {
            if executor.rule_count().await == 0 {
                idle.push(product_id.clone());
            }
        }

        for product_id in idle {
            if let Some(executor) = self.executors.get_mut(&product_id) {
                executor.stop().await;
            }
            self.executors.remove(&product_id);
            info!(product_id = %product_id, "idle rule executor evicted");
        }
    }

    async fn snapshot(&self) -> EngineSnapshot {
        let mut snapshot = EngineSnapshot::new();
        for (product_id, executor) in &self.executors {
            snapshot.insert(product_id.clone(), executor.snapshot().await.into_iter().collect());
        }
        snapshot
    }
}

async fn next_notification(subscription: &mut Option<Subscription>) -> Option<Vec<u8>> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

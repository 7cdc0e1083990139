use crate::aop::{InterceptorManager, LoadContext};
use crate::components::EventExtractor;
use crate::engine::StageRegistry;
use crate::types::{BrokerEvent, DataFrame, RuleDefinition, RuleError, TargetType};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// 提取器特征: 把一个事件转换成数据帧
pub trait Extractor: Send + Sync + Debug {
    /// 返回 `Ok(None)` 表示事件与规则不匹配, 不是错误
    fn extract(&self, event: &BrokerEvent) -> Result<Option<DataFrame>, RuleError>;
}

/// 加载器特征: 把数据帧写入一个目标
#[async_trait]
pub trait Loader: Send + Sync + Debug {
    fn target_type(&self) -> TargetType;

    async fn load(&self, frame: &DataFrame) -> Result<(), RuleError>;
}

/// 提取器选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractorKind {
    #[default]
    Event,
}

/// 一次推送的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    NoData,
    Loaded(usize),
}

/// 绑定到一条规则的 提取 -> 加载 流水线
#[derive(Debug)]
pub struct Pipeline {
    product_id: String,
    rule_name: String,
    extractor: Box<dyn Extractor>,
    loaders: Vec<Arc<dyn Loader>>,
    interceptors: InterceptorManager,
}

impl Pipeline {
    pub fn loader_types(&self) -> Vec<TargetType> {
        self.loaders.iter().map(|l| l.target_type()).collect()
    }

    /// 推送事件: 提取成功后依次执行全部加载器, 任一加载器失败不影响其他加载器
    pub async fn push_data(&self, event: &BrokerEvent) -> Result<PushOutcome, RuleError> {
        let Some(frame) = self.extractor.extract(event)? else {
            return Ok(PushOutcome::NoData);
        };

        let mut loaded = 0;
        let mut failures = Vec::new();
        for loader in &self.loaders {
            let ctx = LoadContext {
                product_id: &self.product_id,
                rule_name: &self.rule_name,
                target: loader.target_type(),
            };
            match self.load_one(&ctx, loader.as_ref(), &frame).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    self.interceptors.load_error(&ctx, &e).await?;
                    failures.push(format!("{}: {}", ctx.target, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(PushOutcome::Loaded(loaded))
        } else {
            Err(RuleError::Load(failures.join("; ")))
        }
    }

    async fn load_one(
        &self,
        ctx: &LoadContext<'_>,
        loader: &dyn Loader,
        frame: &DataFrame,
    ) -> Result<(), RuleError> {
        self.interceptors.before_load(ctx, frame).await?;
        loader.load(frame).await?;
        self.interceptors.after_load(ctx, frame).await
    }
}

/// 流水线构建器
pub struct PipelineBuilder<'a> {
    rule: &'a RuleDefinition,
    extractor: ExtractorKind,
    loaders: Vec<TargetType>,
    interceptors: InterceptorManager,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(rule: &'a RuleDefinition) -> Self {
        Self {
            rule,
            extractor: ExtractorKind::default(),
            loaders: Vec::new(),
            interceptors: InterceptorManager::with_logging(),
        }
    }

    pub fn extractor(mut self, kind: ExtractorKind) -> Self {
        self.extractor = kind;
        self
    }

    pub fn loader(mut self, target: TargetType) -> Self {
        self.loaders.push(target);
        self
    }

    pub fn loaders<I: IntoIterator<Item = TargetType>>(mut self, targets: I) -> Self {
        self.loaders.extend(targets);
        self
    }

    pub fn interceptors(mut self, interceptors: InterceptorManager) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub async fn build(self, stages: &StageRegistry) -> Result<Pipeline, RuleError> {
        let extractor: Box<dyn Extractor> = match self.extractor {
            ExtractorKind::Event => Box::new(EventExtractor::new(self.rule)?),
        };

        if self.loaders.is_empty() {
            return Err(RuleError::Config(format!(
                "rule '{}' has no data target",
                self.rule.rule_name
            )));
        }

        let mut loaders = Vec::with_capacity(self.loaders.len());
        for target in &self.loaders {
            loaders.push(stages.create_loader(*target, &self.rule.data_target).await?);
        }

        Ok(Pipeline {
            product_id: self.rule.product_id.clone(),
            rule_name: self.rule.rule_name.clone(),
            extractor,
            loaders,
            interceptors: self.interceptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aop::StageInterceptor;
    use crate::bus::InMemoryBus;
    use crate::engine::loader_factory;
    use crate::types::{DataProcess, DataTarget};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FailingLoader;

    #[async_trait]
    impl Loader for FailingLoader {
        fn target_type(&self) -> TargetType {
            TargetType::Webhook
        }

        async fn load(&self, _frame: &DataFrame) -> Result<(), RuleError> {
            Err(RuleError::Load("unreachable host".into()))
        }
    }

    #[derive(Debug, Default)]
    struct CountingInterceptor {
        after: AtomicUsize,
        errors: AtomicUsize,
    }

    #[async_trait]
    impl StageInterceptor for CountingInterceptor {
        async fn before<'a>(&self, _: &LoadContext<'a>, _: &DataFrame) -> Result<(), RuleError> {
            Ok(())
        }

        async fn after<'a>(&self, _: &LoadContext<'a>, _: &DataFrame) -> Result<(), RuleError> {
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn error<'a>(&self, _: &LoadContext<'a>, _: &RuleError) -> Result<(), RuleError> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn rule() -> RuleDefinition {
        RuleDefinition::new("p1", "r1", DataProcess::new("t", "", &[]), DataTarget::topic("out"))
    }

    #[tokio::test]
    async fn topic_mismatch_is_no_data() {
        let bus = Arc::new(InMemoryBus::new());
        let stages = StageRegistry::with_builtin(bus.clone());
        let definition = rule();
        let pipeline = PipelineBuilder::new(&definition)
            .loader(TargetType::Topic)
            .build(&stages)
            .await
            .unwrap();

        let event = BrokerEvent::publish("dev-1", "p1", "other", br#"{"a":1}"#);
        assert_eq!(pipeline.push_data(&event).await.unwrap(), PushOutcome::NoData);
        assert!(bus.published("out").await.is_empty());
    }

    #[tokio::test]
    async fn failing_loader_does_not_block_others() {
        let bus = Arc::new(InMemoryBus::new());
        let stages = StageRegistry::with_builtin(bus.clone());
        stages
            .register(
                TargetType::Webhook,
                loader_factory(|_| Ok(Arc::new(FailingLoader) as Arc<dyn Loader>)),
            )
            .await;

        let counter = Arc::new(CountingInterceptor::default());
        let mut interceptors = InterceptorManager::new();
        interceptors.register(counter.clone());

        let definition = rule();
        let pipeline = PipelineBuilder::new(&definition)
            .loaders([TargetType::Webhook, TargetType::Topic])
            .interceptors(interceptors)
            .build(&stages)
            .await
            .unwrap();
        assert_eq!(pipeline.loader_types(), vec![TargetType::Webhook, TargetType::Topic]);

        let event = BrokerEvent::publish("dev-1", "p1", "t", br#"{"a":1}"#);
        let err = pipeline.push_data(&event).await.unwrap_err();
        assert!(matches!(err, RuleError::Load(_)));

        let published = bus.published("out").await;
        assert_eq!(published.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(body, json!({ "a": 1 }));
        assert_eq!(counter.after.load(Ordering::SeqCst), 1);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rule_without_target_fails_to_build() {
        let stages = StageRegistry::with_builtin(Arc::new(InMemoryBus::new()));
        let definition = rule();
        let err = PipelineBuilder::new(&definition).build(&stages).await.unwrap_err();
        assert!(matches!(err, RuleError::Config(_)));
    }
}

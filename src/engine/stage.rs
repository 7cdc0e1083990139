use crate::bus::EventBus;
use crate::components::{DatabaseLoader, TopicLoader, WebhookLoader};
use crate::engine::Loader;
use crate::types::{DataTarget, RuleError, TargetType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 加载器工厂, 根据目标配置创建加载器
pub type LoaderFactory =
    Arc<dyn Fn(&DataTarget) -> Result<Arc<dyn Loader>, RuleError> + Send + Sync>;

/// 包装闭包为加载器工厂
pub fn loader_factory<F>(factory: F) -> LoaderFactory
where
    F: Fn(&DataTarget) -> Result<Arc<dyn Loader>, RuleError> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// 目标类型到加载器工厂的注册表
pub struct StageRegistry {
    factories: RwLock<HashMap<TargetType, LoaderFactory>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// 注册内置的 topic / database / webhook 加载器
    pub fn with_builtin(bus: Arc<dyn EventBus>) -> Self {
        let mut factories: HashMap<TargetType, LoaderFactory> = HashMap::new();
        factories.insert(
            TargetType::Topic,
            loader_factory(move |target| {
                Ok(Arc::new(TopicLoader::new(target, bus.clone())?) as Arc<dyn Loader>)
            }),
        );
        factories.insert(
            TargetType::Database,
            loader_factory(|target| Ok(Arc::new(DatabaseLoader::new(target)?) as Arc<dyn Loader>)),
        );
        factories.insert(
            TargetType::Webhook,
            loader_factory(|target| Ok(Arc::new(WebhookLoader::new(target)?) as Arc<dyn Loader>)),
        );
        Self {
            factories: RwLock::new(factories),
        }
    }

    pub async fn register(&self, target: TargetType, factory: LoaderFactory) {
        self.factories.write().await.insert(target, factory);
    }

    pub async fn registered_types(&self) -> Vec<TargetType> {
        self.factories.read().await.keys().copied().collect()
    }

    pub async fn create_loader(
        &self,
        target: TargetType,
        config: &DataTarget,
    ) -> Result<Arc<dyn Loader>, RuleError> {
        let factory = self
            .factories
            .read()
            .await
            .get(&target)
            .cloned()
            .ok_or_else(|| RuleError::Config(format!("unsupported data target '{}'", target)))?;
        factory(config)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

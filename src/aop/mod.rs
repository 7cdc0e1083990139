use crate::types::{DataFrame, RuleError, TargetType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// 一次加载的上下文
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub product_id: &'a str,
    pub rule_name: &'a str,
    pub target: TargetType,
}

/// 加载拦截器特征,在每次加载的不同阶段进行拦截处理
#[async_trait]
pub trait StageInterceptor: Send + Sync + std::fmt::Debug {
    /// 加载前的拦截处理, 返回错误时跳过本次加载
    ///
    /// # Arguments
    /// * `ctx` - 加载上下文
    /// * `frame` - 待加载的数据帧
    async fn before<'a>(&self, ctx: &LoadContext<'a>, frame: &DataFrame) -> Result<(), RuleError>;

    /// 加载成功后的拦截处理
    async fn after<'a>(&self, ctx: &LoadContext<'a>, frame: &DataFrame) -> Result<(), RuleError>;

    /// 加载出错时的拦截处理
    async fn error<'a>(&self, ctx: &LoadContext<'a>, error: &RuleError) -> Result<(), RuleError>;
}

/// 拦截器管理器,用于管理和执行所有注册的拦截器
#[derive(Debug, Default, Clone)]
pub struct InterceptorManager {
    interceptors: Vec<Arc<dyn StageInterceptor>>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认注册日志拦截器
    pub fn with_logging() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(LoggingInterceptor));
        manager
    }

    pub fn register(&mut self, interceptor: Arc<dyn StageInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub async fn before_load<'a>(
        &self,
        ctx: &LoadContext<'a>,
        frame: &DataFrame,
    ) -> Result<(), RuleError> {
        for interceptor in &self.interceptors {
            interceptor.before(ctx, frame).await?;
        }
        Ok(())
    }

    pub async fn after_load<'a>(
        &self,
        ctx: &LoadContext<'a>,
        frame: &DataFrame,
    ) -> Result<(), RuleError> {
        for interceptor in &self.interceptors {
            interceptor.after(ctx, frame).await?;
        }
        Ok(())
    }

    pub async fn load_error<'a>(
        &self,
        ctx: &LoadContext<'a>,
        error: &RuleError,
    ) -> Result<(), RuleError> {
        for interceptor in &self.interceptors {
            interceptor.error(ctx, error).await?;
        }
        Ok(())
    }
}

/// 日志拦截器,记录每次加载的关键信息
#[derive(Debug)]
pub struct LoggingInterceptor;

#[async_trait]
impl StageInterceptor for LoggingInterceptor {
    async fn before<'a>(&self, ctx: &LoadContext<'a>, frame: &DataFrame) -> Result<(), RuleError> {
        debug!(
            product_id = ctx.product_id,
            rule_name = ctx.rule_name,
            target = %ctx.target,
            frame_id = %frame.id,
            "loading frame"
        );
        Ok(())
    }

    async fn after<'a>(&self, ctx: &LoadContext<'a>, frame: &DataFrame) -> Result<(), RuleError> {
        debug!(
            product_id = ctx.product_id,
            rule_name = ctx.rule_name,
            target = %ctx.target,
            fields = frame.fields.len(),
            "frame loaded"
        );
        Ok(())
    }

    async fn error<'a>(&self, ctx: &LoadContext<'a>, error: &RuleError) -> Result<(), RuleError> {
        warn!(
            product_id = ctx.product_id,
            rule_name = ctx.rule_name,
            target = %ctx.target,
            "load failed: {}",
            error
        );
        Ok(())
    }
}

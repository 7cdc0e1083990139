use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    /// 规则配置错误: 不支持的目标类型、非法条件表达式、订阅地址错误等
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rule '{0}' doesn't exist")]
    NotFound(String),

    #[error("product '{0}' doesn't exist")]
    ProductNotFound(String),

    #[error("rule '{0}' already exists")]
    Duplicate(String),

    #[error("invalid action '{0}'")]
    InvalidAction(String),

    #[error("invalid operation on product {product_id} rule {rule_name}")]
    InvalidOperation {
        product_id: String,
        rule_name: String,
    },

    /// 数据提取失败, 只影响当前事件与当前规则
    #[error("extract failed: {0}")]
    Extract(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("load failed: {0}")]
    Load(String),

    #[error("rule '{0}' timed out")]
    Timeout(String),

    #[error("event bus: {0}")]
    Bus(String),

    #[error("registry: {0}")]
    Registry(String),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("rule engine is not running")]
    EngineStopped,
}

impl From<redis::RedisError> for RuleError {
    fn from(e: redis::RedisError) -> Self {
        RuleError::Bus(e.to_string())
    }
}

impl From<reqwest::Error> for RuleError {
    fn from(e: reqwest::Error) -> Self {
        RuleError::Load(e.to_string())
    }
}

//! 规则/产品注册中心: 规则定义与状态的权威存储

mod memory;
mod redis;

pub use self::memory::InMemoryRegistry;
pub use self::redis::RedisRegistry;

use crate::types::{Product, RuleDefinition, RuleError, RuleStatus};
use async_trait::async_trait;
use std::fmt::Debug;

#[async_trait]
pub trait RuleRegistry: Send + Sync + Debug {
    /// 读取规则定义, 不存在时返回 `RuleError::NotFound`
    async fn get_rule(&self, product_id: &str, rule_name: &str) -> Result<RuleDefinition, RuleError>;

    /// 读取产品, 不存在时返回 `RuleError::ProductNotFound`
    async fn get_product(&self, product_id: &str) -> Result<Product, RuleError>;

    /// 查询处于指定状态的全部规则, 用于启动恢复
    async fn get_rules_with_status(&self, status: RuleStatus) -> Result<Vec<RuleDefinition>, RuleError>;

    /// 新增规则, `(product_id, rule_name)` 已存在时返回 `RuleError::Duplicate`
    async fn put_rule(&self, rule: RuleDefinition) -> Result<(), RuleError>;

    /// 替换已有规则
    async fn update_rule(&self, rule: RuleDefinition) -> Result<(), RuleError>;

    async fn remove_rule(&self, product_id: &str, rule_name: &str) -> Result<(), RuleError>;

    async fn set_rule_status(
        &self,
        product_id: &str,
        rule_name: &str,
        status: RuleStatus,
    ) -> Result<(), RuleError>;

    async fn put_product(&self, product: Product) -> Result<(), RuleError>;
}

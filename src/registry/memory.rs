use super::RuleRegistry;
use crate::types::{rule_key, Product, RuleDefinition, RuleError, RuleStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 内存注册中心
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    rules: Arc<RwLock<HashMap<String, RuleDefinition>>>,
    products: Arc<RwLock<HashMap<String, Product>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }
}

#[async_trait]
impl RuleRegistry for InMemoryRegistry {
    async fn get_rule(&self, product_id: &str, rule_name: &str) -> Result<RuleDefinition, RuleError> {
        self.rules
            .read()
            .await
            .get(&rule_key(product_id, rule_name))
            .cloned()
            .ok_or_else(|| RuleError::NotFound(rule_name.to_string()))
    }

    async fn get_product(&self, product_id: &str) -> Result<Product, RuleError> {
        self.products
            .read()
            .await
            .get(product_id)
            .cloned()
            .ok_or_else(|| RuleError::ProductNotFound(product_id.to_string()))
    }

    async fn get_rules_with_status(&self, status: RuleStatus) -> Result<Vec<RuleDefinition>, RuleError> {
        Ok(self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn put_rule(&self, rule: RuleDefinition) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        let key = rule.key();
        if rules.contains_key(&key) {
            return Err(RuleError::Duplicate(rule.rule_name));
        }
        rules.insert(key, rule);
        Ok(())
    }

    async fn update_rule(&self, mut rule: RuleDefinition) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        let key = rule.key();
        let existing = rules
            .get(&key)
            .ok_or_else(|| RuleError::NotFound(rule.rule_name.clone()))?;
        rule.time_created = existing.time_created;
        rule.time_updated = Utc::now();
        rules.insert(key, rule);
        Ok(())
    }

    async fn remove_rule(&self, product_id: &str, rule_name: &str) -> Result<(), RuleError> {
        self.rules
            .write()
            .await
            .remove(&rule_key(product_id, rule_name))
            .map(|_| ())
            .ok_or_else(|| RuleError::NotFound(rule_name.to_string()))
    }

    async fn set_rule_status(
        &self,
        product_id: &str,
        rule_name: &str,
        status: RuleStatus,
    ) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(&rule_key(product_id, rule_name))
            .ok_or_else(|| RuleError::NotFound(rule_name.to_string()))?;
        rule.status = status;
        rule.time_updated = Utc::now();
        Ok(())
    }

    async fn put_product(&self, product: Product) -> Result<(), RuleError> {
        self.products
            .write()
            .await
            .insert(product.product_id.clone(), product);
        Ok(())
    }
}

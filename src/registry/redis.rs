use super::RuleRegistry;
use crate::types::{rule_key, Product, RuleDefinition, RuleError, RuleStatus};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use tracing::warn;

/// Redis 注册中心, 规则与产品以 JSON 文档保存在两个 hash 中
#[derive(Clone)]
pub struct RedisRegistry {
    conn: ConnectionManager,
    rules_key: String,
    products_key: String,
}

impl fmt::Debug for RedisRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRegistry")
            .field("rules_key", &self.rules_key)
            .field("products_key", &self.products_key)
            .finish()
    }
}

fn registry_err(e: RedisError) -> RuleError {
    RuleError::Registry(e.to_string())
}

impl RedisRegistry {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, RuleError> {
        let client = Client::open(url)
            .map_err(|e| RuleError::Config(format!("invalid registry address '{}': {}", url, e)))?;
        let conn = ConnectionManager::new(client).await.map_err(registry_err)?;
        Ok(Self {
            conn,
            rules_key: format!("{}:rules", prefix),
            products_key: format!("{}:products", prefix),
        })
    }

    async fn write_rule(&self, rule: &RuleDefinition) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let doc = serde_json::to_string(rule)?;
        let _: () = conn
            .hset(&self.rules_key, rule.key(), doc)
            .await
            .map_err(registry_err)?;
        Ok(())
    }
}

#[async_trait]
impl RuleRegistry for RedisRegistry {
    async fn get_rule(&self, product_id: &str, rule_name: &str) -> Result<RuleDefinition, RuleError> {
        let mut conn = self.conn.clone();
        let doc: Option<String> = conn
            .hget(&self.rules_key, rule_key(product_id, rule_name))
            .await
            .map_err(registry_err)?;
        let doc = doc.ok_or_else(|| RuleError::NotFound(rule_name.to_string()))?;
        Ok(serde_json::from_str(&doc)?)
    }

    async fn get_product(&self, product_id: &str) -> Result<Product, RuleError> {
        let mut conn = self.conn.clone();
        let doc: Option<String> = conn
            .hget(&self.products_key, product_id)
            .await
            .map_err(registry_err)?;
        let doc = doc.ok_or_else(|| RuleError::ProductNotFound(product_id.to_string()))?;
        Ok(serde_json::from_str(&doc)?)
    }

    async fn get_rules_with_status(&self, status: RuleStatus) -> Result<Vec<RuleDefinition>, RuleError> {
        let mut conn = self.conn.clone();
        let docs: Vec<String> = conn.hvals(&self.rules_key).await.map_err(registry_err)?;

        let mut rules = Vec::new();
        for doc in docs {
            match serde_json::from_str::<RuleDefinition>(&doc) {
                Ok(rule) if rule.status == status => rules.push(rule),
                Ok(_) => {}
                // 损坏的文档不影响其他规则
                Err(e) => warn!("skip malformed rule document: {}", e),
            }
        }
        Ok(rules)
    }

    async fn put_rule(&self, rule: RuleDefinition) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let doc = serde_json::to_string(&rule)?;
        let inserted: bool = conn
            .hset_nx(&self.rules_key, rule.key(), doc)
            .await
            .map_err(registry_err)?;
        if !inserted {
            return Err(RuleError::Duplicate(rule.rule_name));
        }
        Ok(())
    }

    async fn update_rule(&self, mut rule: RuleDefinition) -> Result<(), RuleError> {
        let existing = self.get_rule(&rule.product_id, &rule.rule_name).await?;
        rule.time_created = existing.time_created;
        rule.time_updated = Utc::now();
        self.write_rule(&rule).await
    }

    async fn remove_rule(&self, product_id: &str, rule_name: &str) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .hdel(&self.rules_key, rule_key(product_id, rule_name))
            .await
            .map_err(registry_err)?;
        if removed == 0 {
            return Err(RuleError::NotFound(rule_name.to_string()));
        }
        Ok(())
    }

    async fn set_rule_status(
        &self,
        product_id: &str,
        rule_name: &str,
        status: RuleStatus,
    ) -> Result<(), RuleError> {
        let mut rule = self.get_rule(product_id, rule_name).await?;
        rule.status = status;
        rule.time_updated = Utc::now();
        self.write_rule(&rule).await
    }

    async fn put_product(&self, product: Product) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let doc = serde_json::to_string(&product)?;
        let _: () = conn
            .hset(&self.products_key, &product.product_id, doc)
            .await
            .map_err(registry_err)?;
        Ok(())
    }
}

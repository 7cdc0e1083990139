use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Idle,
    Started,
    Stopped,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatus::Idle => write!(f, "idle"),
            RuleStatus::Started => write!(f, "started"),
            RuleStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// 持久化的规则定义, 由注册中心保存, `(product_id, rule_name)` 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub product_id: String,
    pub rule_name: String,
    #[serde(default)]
    pub data_format: String,
    #[serde(default)]
    pub description: String,
    pub data_process: DataProcess,
    pub data_target: DataTarget,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default = "Utc::now")]
    pub time_created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub time_updated: DateTime<Utc>,
}

impl RuleDefinition {
    pub fn new(
        product_id: &str,
        rule_name: &str,
        data_process: DataProcess,
        data_target: DataTarget,
    ) -> Self {
        let now = Utc::now();
        Self {
            product_id: product_id.to_string(),
            rule_name: rule_name.to_string(),
            data_format: "json".to_string(),
            description: String::new(),
            data_process,
            data_target,
            status: RuleStatus::Idle,
            time_created: now,
            time_updated: now,
        }
    }

    /// 注册中心中的文档键
    pub fn key(&self) -> String {
        rule_key(&self.product_id, &self.rule_name)
    }
}

pub fn rule_key(product_id: &str, rule_name: &str) -> String {
    format!("{}/{}", product_id, rule_name)
}

/// 数据处理配置: 源主题、过滤条件和输出字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProcess {
    #[serde(alias = "sourceTopic")]
    pub topic: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl DataProcess {
    pub fn new(topic: &str, condition: &str, fields: &[&str]) -> Self {
        Self {
            topic: topic.to_string(),
            condition: condition.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// 数据目标类型, 未知类型在构建流水线时报配置错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Topic,
    Database,
    Webhook,
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Topic => write!(f, "topic"),
            TargetType::Database => write!(f, "database"),
            TargetType::Webhook => write!(f, "webhook"),
            TargetType::Unsupported => write!(f, "unsupported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTarget {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DataTarget {
    pub fn topic(topic: &str) -> Self {
        Self {
            target_type: TargetType::Topic,
            topic: Some(topic.to_string()),
            database_host: None,
            database_name: None,
            collection: None,
            username: None,
            password: None,
            url: None,
        }
    }
}

/// 产品信息, 用于解析租户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
}

impl Product {
    pub fn new(product_id: &str, tenant_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_uses_camel_case_documents() {
        let doc = json!({
            "productId": "p1",
            "ruleName": "r1",
            "dataProcess": { "topic": "t", "condition": "", "fields": ["a", "b"] },
            "dataTarget": { "type": "topic", "topic": "out" },
            "status": "started"
        });
        let rule: RuleDefinition = serde_json::from_value(doc).unwrap();
        assert_eq!(rule.key(), "p1/r1");
        assert_eq!(rule.status, RuleStatus::Started);
        assert_eq!(rule.data_target.target_type, TargetType::Topic);
        assert_eq!(rule.data_process.fields, vec!["a", "b"]);
    }

    #[test]
    fn unknown_target_type_is_unsupported() {
        let target: DataTarget = serde_json::from_value(json!({ "type": "kafka" })).unwrap();
        assert_eq!(target.target_type, TargetType::Unsupported);
    }
}

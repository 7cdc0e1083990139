use crate::types::RuleError;
use serde::Deserialize;
use std::time::Duration;

/// 规则引擎进程配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub redis_url: String,
    pub http_addr: String,
    /// 规则生命周期通知主题
    pub notify_topic: String,
    /// 租户事件主题前缀, 完整主题为 `<prefix>-<tenant_id>`
    pub event_topic_prefix: String,
    pub idle_sweep_interval: Duration,
    pub command_capacity: usize,
    pub event_queue_capacity: usize,
    /// 单条规则执行的截止时间, 默认不限制
    pub rule_timeout: Option<Duration>,
    pub registry_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            notify_topic: "rule-notify".to_string(),
            event_topic_prefix: "broker-event".to_string(),
            idle_sweep_interval: Duration::from_secs(30 * 60),
            command_capacity: 256,
            event_queue_capacity: 1024,
            rule_timeout: None,
            registry_prefix: "iot".to_string(),
        }
    }
}

impl EngineConfig {
    /// 从 `RULE_ENGINE_*` 环境变量读取配置, 未设置的项使用默认值
    pub fn from_env() -> Result<Self, RuleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, RuleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RULE_ENGINE_REDIS_URL") {
            config.redis_url = v;
        }
        if let Some(v) = lookup("RULE_ENGINE_HTTP_ADDR") {
            config.http_addr = v;
        }
        if let Some(v) = lookup("RULE_ENGINE_NOTIFY_TOPIC") {
            config.notify_topic = v;
        }
        if let Some(v) = lookup("RULE_ENGINE_EVENT_TOPIC_PREFIX") {
            config.event_topic_prefix = v;
        }
        if let Some(v) = lookup("RULE_ENGINE_REGISTRY_PREFIX") {
            config.registry_prefix = v;
        }
        if let Some(v) = lookup("RULE_ENGINE_IDLE_SWEEP_SECS") {
            config.idle_sweep_interval = Duration::from_secs(parse_number("RULE_ENGINE_IDLE_SWEEP_SECS", &v)?);
        }
        if let Some(v) = lookup("RULE_ENGINE_COMMAND_CAPACITY") {
            config.command_capacity = parse_number("RULE_ENGINE_COMMAND_CAPACITY", &v)? as usize;
        }
        if let Some(v) = lookup("RULE_ENGINE_EVENT_QUEUE_CAPACITY") {
            config.event_queue_capacity = parse_number("RULE_ENGINE_EVENT_QUEUE_CAPACITY", &v)? as usize;
        }
        if let Some(v) = lookup("RULE_ENGINE_RULE_TIMEOUT_MS") {
            let ms = parse_number("RULE_ENGINE_RULE_TIMEOUT_MS", &v)?;
            config.rule_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.command_capacity == 0 || self.event_queue_capacity == 0 {
            return Err(RuleError::Config("queue capacity must be positive".to_string()));
        }
        if self.idle_sweep_interval.is_zero() {
            return Err(RuleError::Config("idle sweep interval must be positive".to_string()));
        }
        Ok(())
    }

    /// 租户的 broker 事件主题
    pub fn event_topic(&self, tenant_id: &str) -> String {
        format!("{}-{}", self.event_topic_prefix, tenant_id)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, RuleError> {
    value
        .trim()
        .parse()
        .map_err(|_| RuleError::Config(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.idle_sweep_interval, Duration::from_secs(1800));
        assert!(config.rule_timeout.is_none());
        assert_eq!(config.event_topic("t1"), "broker-event-t1");
    }

    #[test]
    fn overrides_from_env() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("RULE_ENGINE_IDLE_SWEEP_SECS", "60"),
            ("RULE_ENGINE_RULE_TIMEOUT_MS", "250"),
            ("RULE_ENGINE_EVENT_TOPIC_PREFIX", "events"),
        ]))
        .unwrap();
        assert_eq!(config.idle_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.rule_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.event_topic("t1"), "events-t1");
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = EngineConfig::from_lookup(lookup(&[("RULE_ENGINE_COMMAND_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, RuleError::Config(_)));
    }
}

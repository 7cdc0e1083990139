use crate::components::condition::{lookup_path, parse_condition, Condition};
use crate::engine::Extractor;
use crate::types::{BrokerEvent, DataFrame, RuleDefinition, RuleError};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// 从 publish 事件中提取数据帧: 校验主题、过滤条件、字段投影
#[derive(Debug)]
pub struct EventExtractor {
    product_id: String,
    rule_name: String,
    source_topic: String,
    condition: Option<Condition>,
    fields: Vec<String>,
}

impl EventExtractor {
    /// 条件表达式在这里解析, 语法错误作为配置错误返回
    pub fn new(rule: &RuleDefinition) -> Result<Self, RuleError> {
        let process = &rule.data_process;
        if process.topic.is_empty() {
            return Err(RuleError::Config(format!(
                "rule '{}' has no source topic",
                rule.rule_name
            )));
        }

        let condition = match process.condition.trim() {
            "" => None,
            expr => Some(parse_condition(expr)?),
        };

        Ok(Self {
            product_id: rule.product_id.clone(),
            rule_name: rule.rule_name.clone(),
            source_topic: process.topic.clone(),
            condition,
            fields: process.fields.clone(),
        })
    }

    fn new_frame(&self, event: &BrokerEvent) -> DataFrame {
        let mut frame = DataFrame::new();
        frame.set_context("productId", json!(self.product_id));
        frame.set_context("ruleName", json!(self.rule_name));
        frame.set_context("clientId", json!(event.client_id));
        frame.set_context("topic", json!(event.topic));
        frame
    }

    /// 按查询结果、内置变量、函数的顺序解析输出字段
    fn project(&self, doc: &Value, event: &BrokerEvent, frame: &mut DataFrame) {
        if self.fields.is_empty() {
            if let Value::Object(map) = doc {
                frame.fields = map.clone();
            }
            return;
        }

        for field in &self.fields {
            let path: Vec<&str> = field.split('.').collect();
            if let Some(value) = lookup_path(doc, &path) {
                frame.set_field(field, value.clone());
            } else if let Some(name) = field.strip_prefix('$') {
                match builtin_variable(name, event) {
                    Some(value) => frame.set_field(field, value),
                    None => warn!(rule_name = %self.rule_name, "unknown variable '{}'", field),
                }
            } else {
                match resolve_function(field) {
                    Ok(value) => frame.set_field(field, value),
                    Err(e) => warn!(rule_name = %self.rule_name, "skip field '{}': {}", field, e),
                }
            }
        }
    }
}

impl Extractor for EventExtractor {
    fn extract(&self, event: &BrokerEvent) -> Result<Option<DataFrame>, RuleError> {
        if event.topic != self.source_topic {
            return Ok(None);
        }

        let doc: Value = serde_json::from_slice(&event.payload)
            .map_err(|e| RuleError::Extract(format!("payload is not json: {}", e)))?;
        let mut frame = self.new_frame(event);

        let Some(condition) = &self.condition else {
            match doc {
                Value::Object(map) => frame.fields = map,
                other => {
                    return Err(RuleError::Extract(format!(
                        "payload is not a json object: {}",
                        other
                    )))
                }
            }
            return Ok(Some(frame));
        };

        if !doc.is_object() {
            return Err(RuleError::Extract("payload is not a json object".to_string()));
        }
        if !condition.eval(&doc)? {
            debug!(rule_name = %self.rule_name, topic = %event.topic, "condition not satisfied");
            return Ok(None);
        }

        self.project(&doc, event, &mut frame);
        if frame.fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

fn builtin_variable(name: &str, event: &BrokerEvent) -> Option<Value> {
    match name {
        "deviceId" | "clientId" => Some(json!(event.client_id)),
        "productId" => Some(json!(event.product_id)),
        "topic" => Some(json!(event.topic)),
        "qos" => Some(json!(event.qos)),
        "timestamp" => {
            let ts = if event.timestamp > 0 {
                event.timestamp
            } else {
                Utc::now().timestamp_millis()
            };
            Some(json!(ts))
        }
        _ => None,
    }
}

// TODO: named field functions (e.g. `avg(temp)`) need a function table in the rule definition
fn resolve_function(field: &str) -> Result<Value, RuleError> {
    Err(RuleError::NotImplemented(format!("field function '{}'", field)))
}

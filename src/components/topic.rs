use crate::bus::EventBus;
use crate::engine::Loader;
use crate::types::{DataFrame, DataTarget, RuleError, TargetType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// 将数据帧字段以 JSON 重新发布到目标主题
#[derive(Debug)]
pub struct TopicLoader {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl TopicLoader {
    pub fn new(target: &DataTarget, bus: Arc<dyn EventBus>) -> Result<Self, RuleError> {
        let topic = target
            .topic
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RuleError::Config("topic target requires 'topic'".to_string()))?;
        Ok(Self {
            bus,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Loader for TopicLoader {
    fn target_type(&self) -> TargetType {
        TargetType::Topic
    }

    async fn load(&self, frame: &DataFrame) -> Result<(), RuleError> {
        let payload = frame.fields_json()?;
        self.bus
            .publish(&self.topic, payload)
            .await
            .map_err(|e| RuleError::Load(format!("publish to '{}': {}", self.topic, e)))?;
        debug!(topic = %self.topic, frame_id = %frame.id, "frame republished");
        Ok(())
    }
}

use crate::engine::{ExtractorKind, Pipeline, PipelineBuilder, PushOutcome, StageRegistry};
use crate::types::{BrokerEvent, RuleDefinition, RuleError, RuleStatus};
use std::sync::Arc;

/// 运行时规则: 规则定义加上绑定的流水线
///
/// 启停只切换状态, 不会重建流水线
#[derive(Debug, Clone)]
pub struct Rule {
    definition: Arc<RuleDefinition>,
    pipeline: Arc<Pipeline>,
    status: RuleStatus,
}

impl Rule {
    pub async fn build(definition: RuleDefinition, stages: &StageRegistry) -> Result<Self, RuleError> {
        let pipeline = PipelineBuilder::new(&definition)
            .extractor(ExtractorKind::Event)
            .loader(definition.data_target.target_type)
            .build(stages)
            .await?;

        let status = definition.status;
        Ok(Self {
            definition: Arc::new(definition),
            pipeline: Arc::new(pipeline),
            status,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.rule_name
    }

    pub fn status(&self) -> RuleStatus {
        self.status
    }

    pub fn is_started(&self) -> bool {
        self.status == RuleStatus::Started
    }

    pub fn start(&mut self) {
        self.status = RuleStatus::Started;
    }

    /// 停止后回到 idle
    pub fn stop(&mut self) {
        self.status = RuleStatus::Idle;
    }

    pub async fn handle(&self, event: &BrokerEvent) -> Result<PushOutcome, RuleError> {
        self.pipeline.push_data(event).await
    }
}

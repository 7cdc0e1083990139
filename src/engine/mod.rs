//! 规则引擎核心: 引擎 -> 产品执行器 -> 规则 -> 流水线

mod engine;
mod executor;
mod pipeline;
mod rule;
mod stage;

pub use engine::{EngineSnapshot, RuleEngine};
pub use executor::RuleExecutor;
pub use pipeline::{Extractor, ExtractorKind, Loader, Pipeline, PipelineBuilder, PushOutcome};
pub use rule::Rule;
pub use stage::{loader_factory, LoaderFactory, StageRegistry};

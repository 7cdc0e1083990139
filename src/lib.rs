pub mod aop;
pub mod api;
pub mod bus;
pub mod components;
pub mod config;
pub mod engine;
pub mod registry;
pub mod types;

pub use bus::{EventBus, InMemoryBus, RedisBus, Subscription};
pub use config::EngineConfig;
pub use engine::{RuleEngine, RuleExecutor};
pub use registry::{InMemoryRegistry, RedisRegistry, RuleRegistry};
pub use types::*;

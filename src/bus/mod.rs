//! 消息总线: 租户事件主题、规则通知主题以及 topic 加载器的输出都经过这里

mod memory;
mod redis;

pub use self::memory::InMemoryBus;
pub use self::redis::RedisBus;

use crate::types::RuleError;
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

/// 消息总线特征
#[async_trait]
pub trait EventBus: Send + Sync + Debug {
    /// 向主题发布一条消息
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RuleError>;

    /// 订阅主题, 返回的订阅被丢弃时自动关闭
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RuleError>;
}

/// 一个主题订阅, 独占所属的投递通道
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Vec<u8>>,
    _guard: Option<DropGuard>,
}

impl Subscription {
    pub(crate) fn new(topic: &str, rx: mpsc::Receiver<Vec<u8>>, guard: Option<DropGuard>) -> Self {
        Self {
            topic: topic.to_string(),
            rx,
            _guard: guard,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 等待下一条消息, 总线关闭后返回 None
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

use super::{EventBus, Subscription};
use crate::types::RuleError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

const SUBSCRIPTION_BUFFER: usize = 256;

/// 进程内消息总线, 用于测试和单机运行
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>>,
    published: Arc<RwLock<Vec<(String, Vec<u8>)>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 主题上仍然存活的订阅数量
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// 发布到指定主题的全部消息
    pub async fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .read()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RuleError> {
        self.published
            .write()
            .await
            .push((topic.to_string(), payload.clone()));

        let senders = {
            let mut topics = self.topics.write().await;
            match topics.get_mut(topic) {
                Some(subs) => {
                    subs.retain(|tx| !tx.is_closed());
                    subs.clone()
                }
                None => return Ok(()),
            }
        };

        for tx in senders {
            // 订阅在发送途中被关闭时忽略
            let _ = tx.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, RuleError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(topic, rx, None))
    }
}

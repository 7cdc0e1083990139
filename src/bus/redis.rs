use super::{EventBus, Subscription};
use crate::types::RuleError;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// 基于 Redis pub/sub 的消息总线
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    conn: ConnectionManager,
}

impl fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBus")
            .field("client", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisBus {
    /// 连接 Redis, 地址非法时返回配置错误
    pub async fn connect(url: &str) -> Result<Self, RuleError> {
        let client = Client::open(url)
            .map_err(|e| RuleError::Config(format!("invalid bus address '{}': {}", url, e)))?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        debug!(topic, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, RuleError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let channel = topic.to_string();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = messages.next() => match msg {
                        Some(msg) => {
                            if tx.send(msg.get_payload_bytes().to_vec()).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            warn!(topic = %channel, "redis subscription closed by server");
                            break;
                        }
                    },
                }
            }
            debug!(topic = %channel, "redis subscription released");
        });

        Ok(Subscription::new(topic, rx, Some(cancel.drop_guard())))
    }
}

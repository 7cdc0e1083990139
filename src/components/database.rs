use crate::engine::Loader;
use crate::types::{DataFrame, DataTarget, RuleError, TargetType};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

const DEFAULT_DATABASE: &str = "default";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRIES: usize = 2;

/// 文档存储加载器, 每个数据帧作为 JSON 文档追加到 `<database>:<collection>`
pub struct DatabaseLoader {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    key: String,
}

impl fmt::Debug for DatabaseLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseLoader")
            .field("key", &self.key)
            .finish()
    }
}

impl DatabaseLoader {
    pub fn new(target: &DataTarget) -> Result<Self, RuleError> {
        let host = required(&target.database_host, "databaseHost")?;
        let collection = required(&target.collection, "collection")?;
        let database = target
            .database_name
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DATABASE);

        let url = connection_url(host, target.username.as_deref(), target.password.as_deref());
        // 只校验地址, 连接在写入时建立
        let client = Client::open(url.as_str())
            .map_err(|e| RuleError::Config(format!("invalid database host '{}': {}", host, e)))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            key: format!("{}:{}", database, collection),
        })
    }

    /// 首次写入时建立连接, 之后所有数据帧复用同一个连接管理器; 建立失败时下次写入重试
    async fn connection(&self) -> Result<ConnectionManager, RuleError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(CONNECT_TIMEOUT)
                    .set_response_timeout(CONNECT_TIMEOUT)
                    .set_number_of_retries(CONNECT_RETRIES);
                ConnectionManager::new_with_config(self.client.clone(), config).await
            })
            .await
            .map_err(|e| RuleError::Load(format!("database connection failed: {}", e)))?;
        Ok(conn.clone())
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, RuleError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RuleError::Config(format!("database target requires '{}'", name)))
}

fn connection_url(host: &str, username: Option<&str>, password: Option<&str>) -> String {
    let host = host
        .strip_prefix("redis://")
        .unwrap_or(host);
    match (username, password) {
        (Some(user), Some(pass)) => format!("redis://{}:{}@{}", user, pass, host),
        (None, Some(pass)) => format!("redis://:{}@{}", pass, host),
        _ => format!("redis://{}", host),
    }
}

#[async_trait]
impl Loader for DatabaseLoader {
    fn target_type(&self) -> TargetType {
        TargetType::Database
    }

    async fn load(&self, frame: &DataFrame) -> Result<(), RuleError> {
        let mut conn = self.connection().await?;

        let doc = frame.fields_json()?;
        let len: i64 = conn
            .rpush(&self.key, doc)
            .await
            .map_err(|e| RuleError::Load(format!("write to '{}' failed: {}", self.key, e)))?;
        debug!(key = %self.key, len, frame_id = %frame.id, "frame stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DataTarget {
        DataTarget {
            target_type: TargetType::Database,
            topic: None,
            database_host: Some("127.0.0.1:6379".into()),
            database_name: Some("iot".into()),
            collection: Some("readings".into()),
            username: None,
            password: None,
            url: None,
        }
    }

    #[test]
    fn builds_collection_key() {
        let loader = DatabaseLoader::new(&target()).unwrap();
        assert_eq!(loader.key, "iot:readings");
    }

    #[test]
    fn missing_collection_is_config_error() {
        let mut t = target();
        t.collection = None;
        assert!(matches!(DatabaseLoader::new(&t), Err(RuleError::Config(_))));
    }

    #[tokio::test]
    async fn unreachable_database_is_load_error() {
        let mut t = target();
        t.database_host = Some("127.0.0.1:1".into());
        let loader = DatabaseLoader::new(&t).unwrap();
        let mut frame = DataFrame::new();
        frame.set_field("temp", serde_json::json!(21));

        let err = loader.load(&frame).await.unwrap_err();
        assert!(matches!(err, RuleError::Load(_)), "unexpected error: {:?}", err);
        // 失败的连接不会被缓存
        assert!(loader.conn.get().is_none());
    }

    #[test]
    fn credentials_go_into_url() {
        assert_eq!(
            connection_url("db:6379", Some("u"), Some("p")),
            "redis://u:p@db:6379"
        );
        assert_eq!(connection_url("redis://db", None, None), "redis://db");
    }
}

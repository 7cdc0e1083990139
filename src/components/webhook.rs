use crate::engine::Loader;
use crate::types::{DataFrame, DataTarget, RuleError, TargetType};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const WEBHOOK_TIMEOUT_MS: u64 = 5000;

/// 把数据帧字段 POST 到外部消息服务
#[derive(Debug)]
pub struct WebhookLoader {
    client: Client,
    url: String,
}

impl WebhookLoader {
    pub fn new(target: &DataTarget) -> Result<Self, RuleError> {
        let url = target
            .url
            .as_deref()
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .ok_or_else(|| RuleError::Config("webhook target requires an http(s) 'url'".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(WEBHOOK_TIMEOUT_MS))
            .build()
            .map_err(|e| RuleError::Config(format!("webhook client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Loader for WebhookLoader {
    fn target_type(&self) -> TargetType {
        TargetType::Webhook
    }

    async fn load(&self, frame: &DataFrame) -> Result<(), RuleError> {
        let response = self
            .client
            .post(&self.url)
            .json(&frame.fields)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuleError::Load(format!(
                "webhook '{}' returned status {}",
                self.url, status
            )));
        }
        debug!(url = %self.url, %status, frame_id = %frame.id, "frame delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn collect(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
        received.lock().await.push(body);
        StatusCode::OK
    }

    async fn fail() -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// 在本地端口启动一个接收 webhook 的服务
    async fn serve() -> (String, Received) {
        let received = Received::default();
        let app = Router::new()
            .route("/hook", post(collect))
            .route("/fail", post(fail))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    fn webhook(url: String) -> DataTarget {
        let mut target = DataTarget::topic("unused");
        target.target_type = TargetType::Webhook;
        target.url = Some(url);
        target
    }

    #[tokio::test]
    async fn posts_frame_fields_as_json() {
        let (base, received) = serve().await;
        let loader = WebhookLoader::new(&webhook(format!("{}/hook", base))).unwrap();

        let mut frame = DataFrame::new();
        frame.set_field("temp", json!(21.5));
        frame.set_field("deviceId", json!("dev-1"));
        frame.set_context("ruleName", json!("r1"));
        loader.load(&frame).await.unwrap();

        assert_eq!(
            *received.lock().await,
            vec![json!({ "temp": 21.5, "deviceId": "dev-1" })]
        );
    }

    #[tokio::test]
    async fn error_status_is_load_error() {
        let (base, _) = serve().await;
        let loader = WebhookLoader::new(&webhook(format!("{}/fail", base))).unwrap();

        let err = loader.load(&DataFrame::new()).await.unwrap_err();
        match err {
            RuleError::Load(msg) => assert!(msg.contains("500"), "unexpected message: {}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_non_http_url() {
        let mut target = DataTarget::topic("unused");
        target.target_type = TargetType::Webhook;
        target.url = Some("ftp://example.com".into());
        assert!(matches!(WebhookLoader::new(&target), Err(RuleError::Config(_))));

        target.url = Some("http://example.com/hook".into());
        assert!(WebhookLoader::new(&target).is_ok());
    }
}

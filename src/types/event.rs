use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// broker 事件类型, 只有 publish 事件参与规则匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Publish,
    Subscribe,
    Unsubscribe,
    SessionCreate,
    SessionDestroy,
    #[serde(other)]
    Other,
}

/// 租户事件总线上的 broker 事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, deserialize_with = "deserialize_payload")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    /// 毫秒时间戳
    #[serde(default)]
    pub timestamp: i64,
}

impl BrokerEvent {
    pub fn publish(client_id: &str, product_id: &str, topic: &str, payload: &[u8]) -> Self {
        Self {
            event_type: EventType::Publish,
            client_id: client_id.to_string(),
            product_id: product_id.to_string(),
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: 0,
            retain: false,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_publish(&self) -> bool {
        self.event_type == EventType::Publish
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// payload 既可以是字节数组也可以是 UTF-8 字符串
fn deserialize_payload<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Payload {
        Text(String),
        Bytes(Vec<u8>),
    }

    Ok(match Payload::deserialize(deserializer)? {
        Payload::Text(s) => s.into_bytes(),
        Payload::Bytes(b) => b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_text_payload() {
        let raw = json!({
            "type": "publish",
            "clientId": "dev-1",
            "productId": "p1",
            "topic": "t",
            "payload": "{\"a\":1}"
        });
        let event = BrokerEvent::decode(raw.to_string().as_bytes()).unwrap();
        assert!(event.is_publish());
        assert_eq!(event.payload, br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn session_events_are_not_publish() {
        let raw = json!({ "type": "session_create", "clientId": "dev-1" });
        let event: BrokerEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, EventType::SessionCreate);
        assert!(!event.is_publish());
    }

    #[test]
    fn encoded_event_round_trips_bytes() {
        let event = BrokerEvent::publish("dev-1", "p1", "t", &[0xff, 0x00]);
        let decoded = BrokerEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, vec![0xff, 0x00]);
    }
}

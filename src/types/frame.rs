use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 提取器产出、加载器消费的中间数据, 每个匹配事件创建一次
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub id: Uuid,
    pub fields: Map<String, Value>,
    pub context: Map<String, Value>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            fields: Map::new(),
            context: Map::new(),
        }
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn set_context(&mut self, name: &str, value: Value) {
        self.context.insert(name.to_string(), value);
    }

    pub fn context_str(&self, name: &str) -> Option<&str> {
        self.context.get(name).and_then(Value::as_str)
    }

    /// 加载器输出的 JSON 内容只包含字段
    pub fn fields_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }
}

use crate::types::RuleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::oneshot;

/// 规则生命周期动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Create,
    Remove,
    Update,
    Start,
    Stop,
}

impl FromStr for RuleAction {
    type Err = RuleError;

    /// 解析消息总线上的动作名称, `register`/`unregister` 对应创建与删除
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" | "create" => Ok(RuleAction::Create),
            "unregister" | "remove" => Ok(RuleAction::Remove),
            "update" => Ok(RuleAction::Update),
            "start" => Ok(RuleAction::Start),
            "stop" => Ok(RuleAction::Stop),
            other => Err(RuleError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleAction::Create => "create",
            RuleAction::Remove => "remove",
            RuleAction::Update => "update",
            RuleAction::Start => "start",
            RuleAction::Stop => "stop",
        };
        f.write_str(name)
    }
}

pub type RuleReply = oneshot::Sender<Result<(), RuleError>>;

/// 规则命令, 由调用方创建并且只被引擎消费一次
#[derive(Debug)]
pub struct RuleContext {
    pub product_id: String,
    pub rule_name: String,
    pub action: RuleAction,
    /// 为 true 时调用方等待引擎处理完成并拿到结果
    pub sync: bool,
    pub(crate) reply: Option<RuleReply>,
}

impl RuleContext {
    pub fn new(product_id: &str, rule_name: &str, action: RuleAction) -> Self {
        Self {
            product_id: product_id.to_string(),
            rule_name: rule_name.to_string(),
            action,
            sync: false,
            reply: None,
        }
    }

    /// 同步命令, 见 `RuleEngine::handle_rule`
    pub fn synchronous(product_id: &str, rule_name: &str, action: RuleAction) -> Self {
        Self {
            sync: true,
            ..Self::new(product_id, rule_name, action)
        }
    }

    pub(crate) fn attach_reply(&mut self) -> oneshot::Receiver<Result<(), RuleError>> {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        rx
    }

    /// 回填处理结果; 异步命令的错误只能记录日志
    pub(crate) fn complete(mut self, result: Result<(), RuleError>) {
        match self.reply.take() {
            Some(tx) => {
                // 调用方可能已经放弃等待
                let _ = tx.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::error!(
                        product_id = %self.product_id,
                        rule_name = %self.rule_name,
                        action = %self.action,
                        "rule command failed: {}",
                        e
                    );
                }
            }
        }
    }
}

/// 消息总线上的规则生命周期通知
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleNotification {
    pub product_id: String,
    pub rule_name: String,
    pub action: String,
}

impl TryFrom<RuleNotification> for RuleContext {
    type Error = RuleError;

    fn try_from(n: RuleNotification) -> Result<Self, Self::Error> {
        let action = n.action.parse::<RuleAction>()?;
        Ok(RuleContext::new(&n.product_id, &n.rule_name, action))
    }
}

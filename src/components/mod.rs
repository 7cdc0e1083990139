pub mod condition;
mod database;
mod extractor;
mod topic;
mod webhook;

pub use condition::{parse_condition, CmpOp, Condition};
pub use database::DatabaseLoader;
pub use extractor::EventExtractor;
pub use topic::TopicLoader;
pub use webhook::WebhookLoader;

//! Search index schema definition / 搜索索引的 Schema 定义

use serde::{Deserialize, Serialize};

use crate::models::ChannelType;

/// Post document - post information held by the index / 帖子文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDocument {
    /// Post unique identifier / 帖子ID
    pub id: String,
    /// Owning channel / 所属频道
    pub channel_id: String,
    /// Derived channel visibility, `None` until backfilled / 频道类型（回填前为空）
    pub channel_type: Option<ChannelType>,
    /// Message text / 消息内容
    pub message: String,
    /// Creation time (ms) / 创建时间
    pub create_at: i64,
}

impl PostDocument {
    pub fn new(id: &str, channel_id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            channel_type: None,
            message: message.to_string(),
            create_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel visibility type / 频道可见性类型
///
/// Stored as the single-letter code used by the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelType {
    /// Public channel ("O") / 公开频道
    Open,
    /// Private channel ("P") / 私有频道
    Private,
    /// Direct message ("D") / 私聊
    Direct,
    /// Group message ("G") / 群聊
    Group,
    /// Unknown code, preserved as-is / 未知类型
    Other(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Open => "O",
            ChannelType::Private => "P",
            ChannelType::Direct => "D",
            ChannelType::Group => "G",
            ChannelType::Other(code) => code.as_str(),
        }
    }
}

impl From<&str> for ChannelType {
    fn from(s: &str) -> Self {
        match s {
            "O" => ChannelType::Open,
            "P" => ChannelType::Private,
            "D" => ChannelType::Direct,
            "G" => ChannelType::Group,
            other => ChannelType::Other(other.to_string()),
        }
    }
}

impl From<String> for ChannelType {
    fn from(s: String) -> Self {
        ChannelType::from(s.as_str())
    }
}

impl From<ChannelType> for String {
    fn from(t: ChannelType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel row from the primary store / 频道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    /// Deletion time in milliseconds, 0 when live / 删除时间
    pub delete_at: i64,
}

impl Channel {
    pub fn new(id: &str, channel_type: ChannelType) -> Self {
        Self {
            id: id.to_string(),
            channel_type,
            team_id: String::new(),
            name: id.to_string(),
            display_name: id.to_string(),
            delete_at: 0,
        }
    }
}

/// Listing options for `ChannelStore::get_all_channels` / 频道列表选项
#[derive(Debug, Clone, Default)]
pub struct ChannelSearchOpts {
    /// Include archived channels / 包含已归档频道
    pub include_deleted: bool,
    /// Restrict to one team / 限定团队
    pub team_id: Option<String>,
}

/// Row of the system key-value table / 系统键值记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemRecord {
    pub name: String,
    pub value: String,
}

impl SystemRecord {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

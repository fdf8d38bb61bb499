use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 列表范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListScope {
    /// 顾客端：只包含 `is_active = true` 的行
    Visible,
    /// 管理端：整张表
    Editor,
}

impl ListScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Editor => "editor",
        }
    }

    pub fn active_only(self) -> bool {
        self == Self::Visible
    }
}

/// Hook 暴露给渲染层的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState<T> {
    pub data: T,
    /// 存在未完成的拉取
    pub loading: bool,
    /// 最近一次拉取的错误；成功拉取后清空
    pub error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl<T: Default> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            data: T::default(),
            loading: false,
            error: None,
            last_synced_at: None,
        }
    }
}

impl<T> SyncState<T> {
    /// 是否至少成功拉取过一次
    pub fn is_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }
}

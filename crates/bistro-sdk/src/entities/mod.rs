//! 实体定义
//!
//! 每个实体对应托管库里的一张表。`EntityKind` 为受控枚举，新增实体需同时在后端建表。
//! 行结构统一包含：`id`、展示字段、`is_active`（软删除标志）、`display_order`（手动排序）、
//! `created_at` / `updated_at`。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::backend::OrderBy;
use crate::error::Result;

mod content;
mod gallery;
mod rewards;
mod singleton;
mod staff;

pub use content::{Announcement, Event, NewAnnouncement, NewEvent, NewReview, NewTagline, NewWeeklySpecial, Review, Tagline, WeeklySpecial};
pub use gallery::{GalleryImage, Guide, NewGalleryImage, NewGuide};
pub use rewards::{NewRewardTransaction, RewardTransaction};
pub use singleton::{AboutUs, AboutUsDraft, ContactInfo, ContactInfoDraft};
pub use staff::{EmployeeProfile, EmployeeRole, NewEmployeeProfile};

/// 实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Announcement,
    Event,
    Review,
    Gallery,
    Guide,
    Tagline,
    WeeklySpecial,
    ContactInfo,
    AboutUs,
    Employee,
    Reward,
}

/// 删除策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStrategy {
    /// `is_active = false`
    SoftDelete,
    /// 先删存储对象（失败只记日志），再删行
    PurgeWithObject,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        Self::Announcement,
        Self::Event,
        Self::Review,
        Self::Gallery,
        Self::Guide,
        Self::Tagline,
        Self::WeeklySpecial,
        Self::ContactInfo,
        Self::AboutUs,
        Self::Employee,
        Self::Reward,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Announcement => "announcement",
            Self::Event => "event",
            Self::Review => "review",
            Self::Gallery => "gallery",
            Self::Guide => "guide",
            Self::Tagline => "tagline",
            Self::WeeklySpecial => "weekly_special",
            Self::ContactInfo => "contact_info",
            Self::AboutUs => "about_us",
            Self::Employee => "employee",
            Self::Reward => "reward",
        }
    }

    /// 托管库表名
    pub fn table(self) -> &'static str {
        match self {
            Self::Announcement => "announcements",
            Self::Event => "events",
            Self::Review => "reviews",
            Self::Gallery => "gallery_images",
            Self::Guide => "guides",
            Self::Tagline => "taglines",
            Self::WeeklySpecial => "weekly_specials",
            Self::ContactInfo => "contact_info",
            Self::AboutUs => "about_us",
            Self::Employee => "profiles",
            Self::Reward => "rewards_transactions",
        }
    }

    /// 关联二进制对象所在的 bucket
    pub fn bucket(self) -> Option<&'static str> {
        match self {
            Self::Gallery => Some("gallery"),
            Self::Guide => Some("guides"),
            _ => None,
        }
    }

    pub fn delete_strategy(self) -> DeleteStrategy {
        match self.bucket() {
            Some(_) => DeleteStrategy::PurgeWithObject,
            None => DeleteStrategy::SoftDelete,
        }
    }

    /// 是否支持 `display_order` 手动排序
    pub fn has_display_order(self) -> bool {
        !matches!(self, Self::ContactInfo | Self::AboutUs | Self::Employee | Self::Reward)
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.as_str() == s).ok_or(())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 默认列表排序：`display_order` 升序，`created_at` 降序
pub fn default_ordering() -> Vec<OrderBy> {
    vec![OrderBy::asc("display_order"), OrderBy::desc("created_at")]
}

/// 表行实体
pub trait Entity: Serialize + DeserializeOwned + Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    /// 插入载荷
    type Draft: Serialize + Send + Sync;

    fn id(&self) -> Uuid;

    fn is_active(&self) -> bool;

    fn ordering() -> Vec<OrderBy> {
        default_ordering()
    }

    /// 关联的存储对象文件名
    fn object_name(&self) -> Option<&str> {
        None
    }

    /// 插入前的本地校验
    fn validate_draft(_draft: &Self::Draft) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_str(kind.as_str()), Ok(kind));
        }
        assert!(EntityKind::from_str("menu").is_err());
    }

    #[test]
    fn only_media_entities_purge_objects() {
        let purging: Vec<_> = EntityKind::ALL
            .into_iter()
            .filter(|k| k.delete_strategy() == DeleteStrategy::PurgeWithObject)
            .collect();
        assert_eq!(purging, vec![EntityKind::Gallery, EntityKind::Guide]);
        assert_eq!(EntityKind::Gallery.bucket(), Some("gallery"));
        assert_eq!(EntityKind::Employee.table(), "profiles");
    }
}

//! 单行实体：联系方式、关于我们
//!
//! 表里可能残留多行历史数据，读取时取最近更新的一条有效行。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{default_true, Entity, EntityKind};
use crate::backend::OrderBy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub id: Uuid,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// 营业时间展示文本
    #[serde(default)]
    pub hours: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfoDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Default for ContactInfoDraft {
    fn default() -> Self {
        Self {
            phone: None,
            email: None,
            address: None,
            hours: None,
            website_url: None,
            is_active: true,
        }
    }
}

impl Entity for ContactInfo {
    const KIND: EntityKind = EntityKind::ContactInfo;
    type Draft = ContactInfoDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn ordering() -> Vec<OrderBy> {
        vec![OrderBy::desc("updated_at")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutUs {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AboutUsDraft {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Entity for AboutUs {
    const KIND: EntityKind = EntityKind::AboutUs;
    type Draft = AboutUsDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn ordering() -> Vec<OrderBy> {
        vec![OrderBy::desc("updated_at")]
    }
}

//! 带存储对象的实体：相册图片、指南文件
//!
//! 删除时先删 bucket 里的对象，再删行。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::require_text;
use super::{default_true, Entity, EntityKind};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    pub image_url: String,
    /// bucket 内的对象名
    pub file_name: String,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGalleryImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub image_url: String,
    pub file_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for GalleryImage {
    const KIND: EntityKind = EntityKind::Gallery;
    type Draft = NewGalleryImage;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn object_name(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn validate_draft(draft: &NewGalleryImage) -> Result<()> {
        require_text("图片地址", &draft.image_url)?;
        require_text("文件名", &draft.file_name)
    }
}

/// 指南（菜单 PDF、过敏原说明等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guide {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_url: String,
    pub file_name: String,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGuide {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub file_url: String,
    pub file_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for Guide {
    const KIND: EntityKind = EntityKind::Guide;
    type Draft = NewGuide;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn object_name(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn validate_draft(draft: &NewGuide) -> Result<()> {
        require_text("指南标题", &draft.title)?;
        require_text("文件名", &draft.file_name)
    }
}

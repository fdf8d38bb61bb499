//! 相册图片 / 指南文件的存储对象
//!
//! 上传时文件名取内容哈希（同一文件重复上传得到同一个对象），行里同时记录公开 URL 与对象名；
//! 删除时由同步 Hook 先调用 [`purge_object`]，再删行。

use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::entities::{EntityKind, GalleryImage, Guide, NewGalleryImage, NewGuide};
use crate::error::{BistroSDKError, Result};
use crate::sync::EntitySyncHook;

/// 已上传的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub name: String,
    pub public_url: String,
    pub content_type: String,
}

/// 按扩展名推断 Content-Type
pub fn detect_content_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// 内容寻址的对象名：`{sha256 前 16 位}.{扩展名}`
pub fn object_name_for(bytes: &[u8], original_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hex::encode(hasher.finalize());
    let short = &digest[..16];

    match Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
    {
        Some(ext) => format!("{}.{}", short, ext.to_lowercase()),
        None => short.to_string(),
    }
}

/// 上传到实体对应的 bucket
pub async fn upload_media(
    client: &BackendClient,
    kind: EntityKind,
    original_name: &str,
    bytes: Vec<u8>,
) -> Result<StoredObject> {
    let bucket = kind
        .bucket()
        .ok_or_else(|| BistroSDKError::InvalidInput(format!("{} 没有关联的存储 bucket", kind)))?;
    if bytes.is_empty() {
        return Err(BistroSDKError::InvalidInput("上传内容为空".to_string()));
    }

    let name = object_name_for(&bytes, original_name);
    let content_type = detect_content_type(original_name);
    let size = bytes.len();
    client
        .storage()
        .upload(bucket, &name, bytes, content_type)
        .await
        .map_err(|e| BistroSDKError::Storage(format!("上传 {}/{} 失败: {}", bucket, name, e)))?;

    info!("📤 已上传 {}/{} ({} bytes, {})", bucket, name, size, content_type);
    Ok(StoredObject {
        bucket: bucket.to_string(),
        public_url: client.storage().public_url(bucket, &name),
        name,
        content_type: content_type.to_string(),
    })
}

/// 删除存储对象
pub async fn purge_object(client: &BackendClient, bucket: &str, name: &str) -> Result<()> {
    client
        .storage()
        .remove(bucket, &[name.to_string()])
        .await
        .map_err(|e| BistroSDKError::Storage(format!("删除 {}/{} 失败: {}", bucket, name, e)))?;
    debug!("🧹 已删除存储对象 {}/{}", bucket, name);
    Ok(())
}

impl EntitySyncHook<GalleryImage> {
    /// 上传图片并新增相册行；行写入失败时删掉刚上传的对象
    pub async fn upload_image(
        &self,
        original_name: &str,
        bytes: Vec<u8>,
        title: Option<String>,
        display_order: i32,
    ) -> Result<GalleryImage> {
        let stored = upload_media(self.client(), EntityKind::Gallery, original_name, bytes).await?;
        let draft = NewGalleryImage {
            title,
            image_url: stored.public_url.clone(),
            file_name: stored.name.clone(),
            is_active: true,
            display_order,
        };
        match self.add(draft).await {
            Ok(image) => Ok(image),
            Err(e) => {
                if let Err(purge) = purge_object(self.client(), &stored.bucket, &stored.name).await {
                    warn!("⚠️ 清理上传对象 {}/{} 失败: {}", stored.bucket, stored.name, purge);
                }
                Err(e)
            }
        }
    }
}

impl EntitySyncHook<Guide> {
    /// 上传指南文件并新增指南行；行写入失败时删掉刚上传的对象
    pub async fn upload_guide(
        &self,
        original_name: &str,
        bytes: Vec<u8>,
        title: &str,
        description: Option<String>,
    ) -> Result<Guide> {
        let stored = upload_media(self.client(), EntityKind::Guide, original_name, bytes).await?;
        let draft = NewGuide {
            title: title.to_string(),
            description,
            file_url: stored.public_url.clone(),
            file_name: stored.name.clone(),
            is_active: true,
            display_order: 0,
        };
        match self.add(draft).await {
            Ok(guide) => Ok(guide),
            Err(e) => {
                if let Err(purge) = purge_object(self.client(), &stored.bucket, &stored.name).await {
                    warn!("⚠️ 清理上传对象 {}/{} 失败: {}", stored.bucket, stored.name, purge);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, MemoryBackend};
    use crate::sync::ListScope;
    use std::sync::Arc;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(detect_content_type("Menu.PDF"), "application/pdf");
        assert_eq!(detect_content_type("patio.jpeg"), "image/jpeg");
        assert_eq!(detect_content_type("README"), "application/octet-stream");
    }

    #[test]
    fn object_name_is_content_addressed() {
        let a = object_name_for(b"same bytes", "one.PNG");
        let b = object_name_for(b"same bytes", "two.png");
        let c = object_name_for(b"other bytes", "one.png");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".png"));
        assert_eq!(a.len(), 16 + 4);
    }

    #[tokio::test]
    async fn upload_rejects_entities_without_bucket() {
        let client = BackendClient::in_memory(Arc::new(MemoryBackend::new()));
        let err = upload_media(&client, EntityKind::Review, "x.png", vec![1]).await.unwrap_err();
        assert!(matches!(err, BistroSDKError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn upload_image_stores_object_and_row() {
        let backend = Arc::new(MemoryBackend::new());
        let hook = EntitySyncHook::<GalleryImage>::new(BackendClient::in_memory(backend.clone()), ListScope::Visible);

        let image = hook
            .upload_image("dining-room.jpg", vec![9, 8, 7], Some("Dining room".to_string()), 3)
            .await
            .unwrap();

        assert!(backend.has_object("gallery", &image.file_name));
        assert_eq!(image.image_url, format!("memory://gallery/{}", image.file_name));
        assert_eq!(hook.data().len(), 1);
    }

    #[tokio::test]
    async fn failed_row_insert_removes_uploaded_guide() {
        let backend = Arc::new(MemoryBackend::new());
        let hook = EntitySyncHook::<Guide>::new(BackendClient::in_memory(backend.clone()), ListScope::Editor);
        backend.fail_next(BackendOp::Insert, 1);

        let bytes = b"%PDF-1.7".to_vec();
        let name = object_name_for(&bytes, "allergens.pdf");
        assert!(hook.upload_guide("allergens.pdf", bytes, "Allergens", None).await.is_err());

        assert!(!backend.has_object("guides", &name));
        assert_eq!(backend.call_count(BackendOp::RemoveObject), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_still_reports_insert_error() {
        let backend = Arc::new(MemoryBackend::new());
        let hook = EntitySyncHook::<GalleryImage>::new(BackendClient::in_memory(backend.clone()), ListScope::Editor);
        backend.fail_next(BackendOp::Insert, 1);
        backend.fail_next(BackendOp::RemoveObject, 1);

        let bytes = vec![4, 5, 6];
        let name = object_name_for(&bytes, "terrace.png");
        let err = hook.upload_image("terrace.png", bytes, None, 0).await.unwrap_err();

        assert_eq!(err.http_status(), Some(500));
        assert_eq!(backend.call_count(BackendOp::RemoveObject), 1);
        assert!(backend.has_object("gallery", &name));
        assert!(backend.rows("gallery_images").is_empty());
    }
}

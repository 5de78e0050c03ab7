use anyhow::Context;
use rand::Rng;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::user::UploadedPhoto;

/// File extension for an accepted photo, from its content type or, failing that, its name.
pub fn photo_extension(photo: &UploadedPhoto) -> AppResult<&'static str> {
    let from_type = photo.content_type.as_deref().and_then(|ct| {
        match ct.split(';').next().unwrap_or_default().trim() {
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            _ => None,
        }
    });

    let from_name = || {
        let ext = Path::new(photo.original_name.as_deref()?)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some("jpg"),
            "png" => Some("png"),
            "webp" => Some("webp"),
            "gif" => Some("gif"),
            _ => None,
        }
    };

    from_type
        .or_else(from_name)
        .ok_or_else(|| AppError::validation("Only JPEG, PNG, WEBP or GIF images are allowed"))
}

/// `photo-{millis}-{random}.{ext}`
pub fn photo_file_name(extension: &str, millis: i64) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);
    format!("photo-{}-{}.{}", millis, suffix, extension)
}

/// Writes the photo into `dir` and returns the stored file name.
pub async fn save_photo(dir: &str, photo: &UploadedPhoto) -> AppResult<String> {
    if photo.bytes.is_empty() {
        return Err(AppError::validation("Uploaded photo is empty"));
    }

    let extension = photo_extension(photo)?;
    let file_name = photo_file_name(extension, chrono::Utc::now().timestamp_millis());
    let path = Path::new(dir).join(&file_name);

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", dir))?;
    tokio::fs::write(&path, &photo.bytes)
        .await
        .with_context(|| format!("Failed to store photo {}", path.display()))?;

    tracing::debug!(file = %file_name, size = photo.bytes.len(), "Photo stored");
    Ok(file_name)
}

/// Best effort: a leftover file is only wasted disk space.
pub async fn remove_photo(dir: &str, file_name: &str) {
    let path = Path::new(dir).join(file_name);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!("Failed to remove {}: {}", path.display(), e);
    }
}

use std::path::PathBuf;

use chrono::Utc;
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Where an upload ended up on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub filename: String,
    /// Path relative to the upload root, as served under `/uploads`.
    pub relative_path: String,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct UploadStorage {
    base_path: PathBuf,
}

impl UploadStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create storage directory: {e}")))?;
        Ok(())
    }

    pub fn project_path(&self, project_id: &str) -> PathBuf {
        self.base_path.join("projects").join(project_id)
    }

    /// Writes `bytes` as `<unix timestamp>_<random tag>_<sanitized name>` in
    /// the project's upload directory. The tag keeps same-second uploads of
    /// one name apart.
    pub async fn save_attachment(
        &self,
        project_id: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredUpload> {
        let safe = sanitize_filename(original_name)
            .ok_or_else(|| AppError::Validation("Invalid file name".to_string()))?;
        let tag = Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}_{}", Utc::now().timestamp(), &tag[..8], safe);

        let dir = self.project_path(project_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create project directory: {e}")))?;

        fs::write(dir.join(&filename), bytes)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write file: {e}")))?;

        Ok(StoredUpload {
            relative_path: format!("projects/{project_id}/{filename}"),
            filename,
            size: bytes.len() as i64,
        })
    }

    pub async fn delete_project_dir(&self, project_id: &str) -> Result<()> {
        let path = self.project_path(project_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_dir_all(&path).await.map_err(|e| {
                AppError::Internal(format!("Failed to delete project directory: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Reduces a client-supplied name to ASCII letters, digits, `.`, `-` and `_`.
/// Path components are discarded and leading dots stripped. `None` when
/// nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned.to_string())
    }
}

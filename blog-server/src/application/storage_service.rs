use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::domain::error::DomainError;

pub const BUCKETS: [&str; 2] = ["avatars", "thumbnails"];
pub const MAX_OBJECT_BYTES: usize = 5 * 1024 * 1024;

/// An object read back from a bucket.
#[derive(Debug)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Public buckets on the local filesystem, one directory per bucket.
#[derive(Clone)]
pub struct StorageService {
    root: PathBuf,
    public_base_url: String,
}

impl StorageService {
    pub fn new(root: PathBuf, public_base_url: String) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/api/storage/public/{bucket}/{path}",
            self.public_base_url
        )
    }

    /// Stores `bytes` under `bucket/path`, replacing any previous object.
    /// The first path segment must be the caller's id.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(
        &self,
        caller: Uuid,
        bucket: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<String, DomainError> {
        let file = self.locate(bucket, path)?;
        if path.split('/').next() != Some(caller.to_string().as_str()) {
            return Err(DomainError::Forbidden);
        }
        if bytes.is_empty() {
            return Err(DomainError::BadRequest("empty upload".into()));
        }
        if bytes.len() > MAX_OBJECT_BYTES {
            return Err(DomainError::PayloadTooLarge(MAX_OBJECT_BYTES));
        }

        if let Some(dir) = file.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
        }
        tokio::fs::write(&file, bytes).await.map_err(io_error)?;
        info!(bucket, path, "object stored");
        Ok(self.public_url(bucket, path))
    }

    pub async fn read(&self, bucket: &str, path: &str) -> Result<StoredObject, DomainError> {
        let file = self.locate(bucket, path)?;
        let bytes = tokio::fs::read(&file).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => DomainError::NotFound(format!("object {bucket}/{path}")),
            _ => io_error(e),
        })?;
        let content_type = mime_guess::from_path(&file)
            .first_or_octet_stream()
            .to_string();
        Ok(StoredObject {
            bytes,
            content_type,
        })
    }

    fn locate(&self, bucket: &str, path: &str) -> Result<PathBuf, DomainError> {
        if !BUCKETS.contains(&bucket) {
            return Err(DomainError::NotFound(format!("bucket {bucket}")));
        }
        let valid = !path.is_empty()
            && !path.contains('\\')
            && path
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !valid {
            return Err(DomainError::BadRequest(format!("invalid object path {path}")));
        }
        Ok(self.root.join(bucket).join(path))
    }
}

fn io_error(err: std::io::Error) -> DomainError {
    error!("storage error: {}", err);
    DomainError::Internal(format!("storage error: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn storage() -> (TempDir, StorageService) {
        let dir = tempfile::tempdir().unwrap();
        let service = StorageService::new(dir.path().to_path_buf(), "http://blog.test/".into());
        (dir, service)
    }

    #[tokio::test]
    async fn upload_then_read_back() {
        let (_dir, storage) = storage();
        let caller = Uuid::new_v4();
        let path = format!("{caller}/cover.png");
        let url = storage
            .upload(caller, "thumbnails", &path, b"png-bytes")
            .await
            .unwrap();
        assert_eq!(
            url,
            format!("http://blog.test/api/storage/public/thumbnails/{path}")
        );
        let object = storage.read("thumbnails", &path).await.unwrap();
        assert_eq!(object.bytes, b"png-bytes");
        assert_eq!(object.content_type, "image/png");
    }

    #[tokio::test]
    async fn upload_outside_own_folder_is_forbidden() {
        let (_dir, storage) = storage();
        let path = format!("{}/a.png", Uuid::new_v4());
        let result = storage.upload(Uuid::new_v4(), "avatars", &path, b"x").await;
        assert!(matches!(result, Err(DomainError::Forbidden)));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let (_dir, storage) = storage();
        let caller = Uuid::new_v4();
        let bytes = vec![0u8; MAX_OBJECT_BYTES + 1];
        let result = storage
            .upload(caller, "avatars", &format!("{caller}/big.jpg"), &bytes)
            .await;
        assert!(matches!(result, Err(DomainError::PayloadTooLarge(_))));
    }

    #[rstest]
    #[case::parent("../etc/passwd")]
    #[case::nested_parent("u/../../x")]
    #[case::empty("")]
    #[case::absolute("/tmp/x")]
    #[case::backslash("u\\x")]
    fn rejects_unsafe_paths(#[case] path: &str) {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.locate("avatars", path),
            Err(DomainError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn unknown_bucket_and_missing_object_are_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.read("secrets", "a/b").await,
            Err(DomainError::NotFound(_))
        ));
        assert!(matches!(
            storage.read("avatars", "nobody/none.png").await,
            Err(DomainError::NotFound(_))
        ));
    }
}

//! Object storage interface for source files and rendered assets (MinIO/S3).

use std::path::Path as FsPath;

use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use raster_common::{RasterError, RasterResult};

/// Connection settings for the asset bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Endpoint URL, e.g. `http://minio:9000`.
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// MinIO accepts any region string.
    pub region: String,
    /// Permit plain HTTP, required against a local MinIO.
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "raster-data".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }
}

/// Client for the bucket holding source files and rendered assets.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    pub fn new(config: &ObjectStorageConfig) -> RasterResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            RasterError::StorageError(format!("Failed to create S3 client: {}", e))
        })?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> RasterResult<()> {
        debug!(size = data.len(), "Storing object");
        self.store
            .put(&Path::from(path), data.into())
            .await
            .map_err(|e| RasterError::StorageError(format!("Failed to write {}: {}", path, e)))?;
        Ok(())
    }

    /// Fetch an entire object into memory.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get(&self, path: &str) -> RasterResult<Bytes> {
        let result = self
            .store
            .get(&Path::from(path))
            .await
            .map_err(|e| RasterError::StorageError(format!("Failed to read {}: {}", path, e)))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| RasterError::StorageError(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Fetched object");
        Ok(bytes)
    }

    /// List object keys under a prefix.
    pub async fn list(&self, prefix: &str) -> RasterResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let mut keys = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| RasterError::StorageError(format!("List failed: {}", e)))?
        {
            keys.push(meta.location.to_string());
        }

        Ok(keys)
    }

    /// Move an object within the bucket.
    #[instrument(skip(self), fields(bucket = %self.bucket, from = %from, to = %to))]
    pub async fn rename(&self, from: &str, to: &str) -> RasterResult<()> {
        self.store
            .rename(&Path::from(from), &Path::from(to))
            .await
            .map_err(|e| {
                RasterError::StorageError(format!("Failed to move {} to {}: {}", from, to, e))
            })?;

        Ok(())
    }

    /// Download an object to a local file, creating parent directories.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn download_to(&self, path: &str, local: &FsPath) -> RasterResult<u64> {
        let data = self.get(path).await?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, &data).await?;

        debug!(size = data.len(), local = %local.display(), "Downloaded object");
        Ok(data.len() as u64)
    }

    /// Upload every file under a local directory to `prefix`, mirroring the
    /// relative layout. Returns the number of objects written.
    #[instrument(skip(self), fields(bucket = %self.bucket, prefix = %prefix))]
    pub async fn upload_dir(&self, local: &FsPath, prefix: &str) -> RasterResult<u64> {
        let mut uploaded = 0;

        for entry in WalkDir::new(local) {
            let entry = entry.map_err(|e| {
                RasterError::StorageError(format!("Walk failed under {}: {}", local.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(local).map_err(|e| {
                RasterError::InternalError(format!("Path outside upload root: {}", e))
            })?;
            let key = format!("{}/{}", prefix, relative.to_string_lossy());

            let data = tokio::fs::read(entry.path()).await?;
            self.put(&key, Bytes::from(data)).await?;
            uploaded += 1;
        }

        debug!(uploaded, "Uploaded directory");
        Ok(uploaded)
    }

    /// Download every object under `prefix` into a local directory, mirroring
    /// the relative layout. Returns the number of objects fetched.
    #[instrument(skip(self), fields(bucket = %self.bucket, prefix = %prefix))]
    pub async fn download_prefix(&self, prefix: &str, local: &FsPath) -> RasterResult<u64> {
        let mut downloaded = 0;

        for key in self.list(prefix).await? {
            let relative = key
                .strip_prefix(prefix)
                .unwrap_or(&key)
                .trim_start_matches('/');
            self.download_to(&key, &local.join(relative)).await?;
            downloaded += 1;
        }

        debug!(downloaded, "Downloaded prefix");
        Ok(downloaded)
    }
}

//! FileStore: Filesystem-based Content Addressable Storage.
//!
//! Implements the ContentStore trait using a local filesystem with directory sharding.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── objects/
//! │   ├── ab/
//! │   │   └── cde123...  # Content file (remainder of hash)
//! │   └── 12/
//! │       └── 3456789...
//! └── metadata/
//!     ├── ab/
//!     │   └── cde123....json  # {mime_type, size}
//!     └── 12/
//!         └── 3456789....json
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::CasConfig;
use crate::hash::ContentHash;
use crate::metadata::{CasMetadata, CasReference};
use crate::staging::{CasAddress, SealResult, StagingChunk, StagingId};

/// Trait for content storage backends.
///
/// This allows for alternative implementations (e.g., in-memory for testing,
/// remote storage, caching layers).
pub trait ContentStore: Send + Sync {
    /// Store data with associated MIME type, returning the content hash.
    ///
    /// If the data already exists, returns the hash without writing.
    fn store(&self, data: &[u8], mime_type: &str) -> Result<ContentHash>;

    /// Retrieve data by its content hash.
    ///
    /// Returns `Ok(None)` if the hash doesn't exist.
    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>>;

    /// Check if content exists without retrieving it.
    fn exists(&self, hash: &ContentHash) -> bool;

    /// Get the filesystem path for content (if available).
    ///
    /// Returns `None` for remote storage or if content doesn't exist.
    fn path(&self, hash: &ContentHash) -> Option<PathBuf>;

    /// Get full metadata about stored content.
    ///
    /// Returns `Ok(None)` if the hash doesn't exist or metadata is unavailable.
    fn inspect(&self, hash: &ContentHash) -> Result<Option<CasReference>>;
}

/// Filesystem-based content store.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: CasConfig,
}

impl FileStore {
    /// Create a new FileStore with the given configuration.
    ///
    /// Creates the objects and metadata directories if they don't exist
    /// (unless in read-only mode).
    pub fn new(config: CasConfig) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(config.objects_dir())
                .context("failed to create CAS objects directory")?;
            fs::create_dir_all(config.metadata_dir())
                .context("failed to create CAS metadata directory")?;
        }

        Ok(Self { config })
    }

    /// Create a FileStore at a specific path.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::with_base_path(path))
    }

    /// Create a read-only FileStore at a specific path.
    ///
    /// Useful for a worker process that only needs to read content.
    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::read_only(path))
    }

    /// Get the configuration.
    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Get the path where an object would be stored.
    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .objects_dir()
            .join(hash.prefix())
            .join(hash.remainder())
    }

    /// Get the path where metadata would be stored.
    fn metadata_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .metadata_dir()
            .join(hash.prefix())
            .join(format!("{}.json", hash.remainder()))
    }

    /// Get the path where a staging file would be stored.
    fn staging_path(&self, id: &StagingId) -> PathBuf {
        self.config
            .staging_dir()
            .join(id.prefix())
            .join(id.remainder())
    }

    /// Create a new staging chunk for incremental writes.
    ///
    /// Returns a handle that can be written to. Call `seal()` when done
    /// to compute the content hash and move to the objects directory.
    pub fn create_staging(&self) -> Result<StagingChunk> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }

        let id = StagingId::new();
        let path = self.staging_path(&id);
        StagingChunk::create(id, path)
    }

    /// Create a staging chunk with a specific ID.
    ///
    /// Useful when the ID needs to be known before creation (e.g., for coordination).
    pub fn create_staging_with_id(&self, id: StagingId) -> Result<StagingChunk> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }

        let path = self.staging_path(&id);
        StagingChunk::create(id, path)
    }

    /// Get the path for a staging file by ID.
    pub fn staging_path_for(&self, id: &StagingId) -> PathBuf {
        self.staging_path(id)
    }

    /// Seal a staging chunk: compute hash and move to objects directory.
    ///
    /// This attempts a rename() first (O(1) on same filesystem).
    /// Falls back to copy+delete if cross-filesystem.
    pub fn seal(&self, chunk: &StagingChunk, mime_type: &str) -> Result<SealResult> {
        self.seal_path(&chunk.path, mime_type)
    }

    /// Seal a staging file by path.
    ///
    /// Use this when the staging file was written by another process (e.g., a streaming worker).
    pub fn seal_path(&self, staging_path: &PathBuf, mime_type: &str) -> Result<SealResult> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }

        // Read and hash the content
        let data = fs::read(staging_path).context("failed to read staging file")?;
        let content_hash = ContentHash::from_data(&data);
        let size_bytes = data.len() as u64;

        let obj_path = self.object_path(&content_hash);

        // Create prefix directory if needed
        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent).context("failed to create object prefix directory")?;
        }

        // Try rename first (O(1) on same filesystem)
        if !obj_path.exists() {
            match fs::rename(staging_path, &obj_path) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                    // Cross-filesystem: fall back to copy + delete
                    fs::copy(staging_path, &obj_path).context("failed to copy staging file")?;
                    fs::remove_file(staging_path).context("failed to remove staging file")?;
                }
                Err(e) => {
                    return Err(e).context("failed to rename staging file");
                }
            }
        } else {
            // Content already exists (dedup), just remove staging
            fs::remove_file(staging_path).context("failed to remove staging file")?;
        }

        // Write metadata if configured
        if self.config.store_metadata {
            let meta_path = self.metadata_path(&content_hash);
            if let Some(parent) = meta_path.parent() {
                fs::create_dir_all(parent).context("failed to create metadata prefix directory")?;
            }

            if !meta_path.exists() {
                let metadata = CasMetadata {
                    mime_type: mime_type.to_string(),
                    size: size_bytes,
                };
                let json = serde_json::to_string(&metadata).context("failed to serialize metadata")?;
                fs::write(&meta_path, json).context("failed to write metadata file")?;
            }
        }

        Ok(SealResult {
            content_hash,
            content_path: obj_path,
            size_bytes,
        })
    }

    /// Check if a staging file exists.
    pub fn staging_exists(&self, id: &StagingId) -> bool {
        self.staging_path(id).exists()
    }

    /// Get the path for an address (content or staging).
    pub fn address_path(&self, address: &CasAddress) -> Option<PathBuf> {
        match address {
            CasAddress::Content(hash) => self.path(hash),
            CasAddress::Staging(id) => {
                let path = self.staging_path(id);
                if path.exists() {
                    Some(path)
                } else {
                    None
                }
            }
        }
    }

    /// Remove a staging file (cleanup).
    pub fn remove_staging(&self, id: &StagingId) -> Result<()> {
        let path = self.staging_path(id);
        if path.exists() {
            fs::remove_file(&path).context("failed to remove staging file")?;
        }
        Ok(())
    }
}

impl ContentStore for FileStore {
    fn store(&self, data: &[u8], mime_type: &str) -> Result<ContentHash> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }

        let hash = ContentHash::from_data(data);
        let obj_path = self.object_path(&hash);
        let meta_path = self.metadata_path(&hash);

        // Create prefix directories if needed
        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent).context("failed to create object prefix directory")?;
        }

        // Write object (skip if exists - content-addressed = idempotent)
        if !obj_path.exists() {
            fs::write(&obj_path, data).context("failed to write object file")?;
        }

        // Write metadata if configured
        if self.config.store_metadata {
            if let Some(parent) = meta_path.parent() {
                fs::create_dir_all(parent).context("failed to create metadata prefix directory")?;
            }

            if !meta_path.exists() {
                let metadata = CasMetadata {
                    mime_type: mime_type.to_string(),
                    size: data.len() as u64,
                };
                let json = serde_json::to_string(&metadata).context("failed to serialize metadata")?;
                fs::write(&meta_path, json).context("failed to write metadata file")?;
            }
        }

        Ok(hash)
    }

    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(hash);

        if path.exists() {
            let data = fs::read(&path).context("failed to read object file")?;
            Ok(Some(data))
        } else {
            Ok(None)
        }
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.object_path(hash).exists()
    }

    fn path(&self, hash: &ContentHash) -> Option<PathBuf> {
        let path = self.object_path(hash);
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    fn inspect(&self, hash: &ContentHash) -> Result<Option<CasReference>> {
        let obj_path = self.object_path(hash);
        let meta_path = self.metadata_path(hash);

        if !obj_path.exists() {
            return Ok(None);
        }

        // Try to read metadata
        if meta_path.exists() {
            let json = fs::read_to_string(&meta_path).context("failed to read metadata file")?;
            let metadata: CasMetadata =
                serde_json::from_str(&json).context("failed to parse metadata")?;

            Ok(Some(
                CasReference::new(hash.clone(), metadata.mime_type, metadata.size)
                    .with_path(obj_path.to_string_lossy()),
            ))
        } else {
            // No metadata - infer size from file, use generic mime type
            let file_size = fs::metadata(&obj_path)
                .context("failed to stat object file")?
                .len();

            Ok(Some(
                CasReference::new(hash.clone(), "application/octet-stream", file_size)
                    .with_path(obj_path.to_string_lossy()),
            ))
        }
    }
}

//! `FingerprintStore`: the store interface consumed by the graph-cache
//! resolver (`crate::graphcache`).
//!
//! Conceptually this is two address spaces layered on one content-addressed
//! blob store. Entries are looked up by an externally supplied fingerprint,
//! which is generally *not* the hash of its own serialized payload (see the
//! hashing rules in `graphcache`), so a small sharded index maps each
//! fingerprint to the content hash of the entry currently published there.
//! `try_load_content` bypasses the index and loads by that content hash
//! directly - the resolver uses it to inspect a conflicting entry surfaced
//! by a failed publish.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::hash::ContentHash;
use crate::store::{ContentStore, FileStore};

/// A record a fingerprint resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Terminal record a fingerprint chain resolves to.
    GraphDescriptor(Vec<u8>),
    /// An intermediate hop: observed graph inputs pinning the next fingerprint.
    GraphInputDescriptor(Vec<u8>),
}

impl Entry {
    fn tag(&self) -> u8 {
        match self {
            Entry::GraphDescriptor(_) => 0,
            Entry::GraphInputDescriptor(_) => 1,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Entry::GraphDescriptor(p) | Entry::GraphInputDescriptor(p) => p,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload().len());
        out.push(self.tag());
        out.extend_from_slice(self.payload());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let (tag, payload) = bytes.split_first().context("empty fingerprint entry")?;
        match tag {
            0 => Ok(Entry::GraphDescriptor(payload.to_vec())),
            1 => Ok(Entry::GraphInputDescriptor(payload.to_vec())),
            other => anyhow::bail!("unknown fingerprint entry tag {other}"),
        }
    }
}

/// Outcome of a `try_store` publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    RejectedDueToConflictingEntry(ContentHash),
}

/// Store interface consumed by the graph-cache resolver.
///
/// `try_get`/`try_store` key on an arbitrary externally supplied fingerprint;
/// `try_load_content` keys on the content hash of a specific serialized
/// entry, used to load a conflicting entry discovered mid-publish.
pub trait FingerprintStore: Send + Sync {
    fn try_get(&self, fingerprint: &ContentHash) -> Result<Option<Entry>>;

    fn try_store(
        &self,
        fingerprint: &ContentHash,
        entry: Entry,
        replace_existing: bool,
    ) -> Result<PublishOutcome>;

    fn try_load_content(&self, hash: &ContentHash) -> Result<Option<Entry>>;
}

const ENTRY_MIME_TYPE: &str = "application/x-distbuild-fingerprint-entry";

/// Filesystem-backed `FingerprintStore` built on a `FileStore`.
///
/// Blobs are stored content-addressed as usual; a small sharded index under
/// `{base_path}/fingerprints/` maps each fingerprint to the content hash of
/// the entry currently published there, so conflicting publishes can be
/// detected in one read instead of a scan.
pub struct FsFingerprintStore {
    blobs: FileStore,
    index_dir: PathBuf,
}

impl FsFingerprintStore {
    pub fn new(blobs: FileStore) -> Result<Self> {
        let index_dir = blobs.config().base_path.join("fingerprints");
        if !blobs.config().read_only {
            fs::create_dir_all(&index_dir)
                .context("failed to create fingerprint index directory")?;
        }
        Ok(Self { blobs, index_dir })
    }

    fn index_path(&self, fingerprint: &ContentHash) -> PathBuf {
        self.index_dir
            .join(fingerprint.prefix())
            .join(fingerprint.remainder())
    }

    fn read_index(&self, fingerprint: &ContentHash) -> Result<Option<ContentHash>> {
        let path = self.index_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).context("failed to read fingerprint index entry")?;
        Ok(Some(ContentHash::from_str_checked(contents.trim())?))
    }

    fn write_index(&self, fingerprint: &ContentHash, target: &ContentHash) -> Result<()> {
        let path = self.index_path(fingerprint);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create fingerprint index shard")?;
        }
        fs::write(&path, target.as_str()).context("failed to write fingerprint index entry")
    }
}

impl FingerprintStore for FsFingerprintStore {
    fn try_get(&self, fingerprint: &ContentHash) -> Result<Option<Entry>> {
        let Some(target) = self.read_index(fingerprint)? else {
            return Ok(None);
        };
        self.try_load_content(&target)
    }

    fn try_store(
        &self,
        fingerprint: &ContentHash,
        entry: Entry,
        replace_existing: bool,
    ) -> Result<PublishOutcome> {
        let encoded = entry.encode();
        let target = self.blobs.store(&encoded, ENTRY_MIME_TYPE)?;

        if let Some(existing) = self.read_index(fingerprint)? {
            if existing == target {
                return Ok(PublishOutcome::Published);
            }
            if !replace_existing {
                return Ok(PublishOutcome::RejectedDueToConflictingEntry(existing));
            }
        }

        self.write_index(fingerprint, &target)?;
        Ok(PublishOutcome::Published)
    }

    fn try_load_content(&self, hash: &ContentHash) -> Result<Option<Entry>> {
        let Some(bytes) = self.blobs.retrieve(hash)? else {
            return Ok(None);
        };
        Entry::decode(&bytes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CasConfig;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> FsFingerprintStore {
        let blobs = FileStore::new(CasConfig::with_base_path(temp_dir.path())).unwrap();
        FsFingerprintStore::new(blobs).unwrap()
    }

    #[test]
    fn test_store_then_get_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let fp = ContentHash::from_data(b"root");

        let outcome = fps
            .try_store(&fp, Entry::GraphDescriptor(b"descriptor payload".to_vec()), false)
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Published);

        let got = fps.try_get(&fp).unwrap().unwrap();
        assert_eq!(got, Entry::GraphDescriptor(b"descriptor payload".to_vec()));
    }

    #[test]
    fn test_get_miss_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let fp = ContentHash::from_data(b"never stored");
        assert!(fps.try_get(&fp).unwrap().is_none());
    }

    #[test]
    fn test_conflicting_publish_without_replace_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let fp = ContentHash::from_data(b"root");
        fps.try_store(&fp, Entry::GraphDescriptor(b"first".to_vec()), false)
            .unwrap();

        let outcome = fps
            .try_store(&fp, Entry::GraphDescriptor(b"second".to_vec()), false)
            .unwrap();
        assert!(matches!(
            outcome,
            PublishOutcome::RejectedDueToConflictingEntry(_)
        ));

        // Original entry survives untouched.
        let got = fps.try_get(&fp).unwrap().unwrap();
        assert_eq!(got, Entry::GraphDescriptor(b"first".to_vec()));
    }

    #[test]
    fn test_replace_existing_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let fp = ContentHash::from_data(b"root");
        fps.try_store(&fp, Entry::GraphDescriptor(b"first".to_vec()), false)
            .unwrap();
        fps.try_store(&fp, Entry::GraphDescriptor(b"second".to_vec()), true)
            .unwrap();

        let got = fps.try_get(&fp).unwrap().unwrap();
        assert_eq!(got, Entry::GraphDescriptor(b"second".to_vec()));
    }

    #[test]
    fn test_try_load_content_by_hash() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let encoded = Entry::GraphInputDescriptor(b"hop".to_vec()).encode();
        let hash = fps.blobs.store(&encoded, ENTRY_MIME_TYPE).unwrap();

        let loaded = fps.try_load_content(&hash).unwrap().unwrap();
        assert_eq!(loaded, Entry::GraphInputDescriptor(b"hop".to_vec()));
    }
}

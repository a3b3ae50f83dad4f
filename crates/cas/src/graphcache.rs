//! Graph-cache resolver: a bounded fingerprint-chain walk over a
//! `FingerprintStore` that resolves a pip-graph identity under changing
//! environmental inputs.
//!
//! Two entry points mirror the dual lookup/publish modes: [`lookup`] walks a
//! chain starting at a root fingerprint until it finds a terminal
//! `GraphDescriptor` or gives up; [`publish`] walks the same structure with
//! conflict-resolving publish semantics.

use std::path::PathBuf;
use std::thread;

use thiserror::Error;

use crate::fingerprint_store::{Entry, FingerprintStore, PublishOutcome};
use crate::hash::ContentHash;

/// Default bound on chain length before a lookup or publish gives up.
pub const DEFAULT_MAX_HOP_COUNT: u32 = 10;
/// Cap on the number of per-file hashing failures reported for diagnostics.
pub const FAILED_HASH_LIMIT: usize = 25;
/// Cap on the number of recorded input mismatches per category.
pub const INPUT_DIFFERENCES_LIMIT: usize = 25;
/// Bound on how many observed paths are hashed concurrently per hop (§5:
/// "Hashing of observed paths is parallelized with bounded concurrency").
const MAX_CONCURRENT_PATH_HASHES: usize = 8;

const SALT_PATH_OBSERVATIONS: &str = "PathObservations";
const SALT_ENVIRONMENT_VARIABLES: &str = "EnvironmentVariables";
const SALT_MOUNTS: &str = "Mounts";
const ABSENT_FILE_SENTINEL: &str = "\u{0}absent-file\u{0}";
const NULL_MARKER: &str = "\u{0}null\u{0}";
/// Magic `expected_hash` value meaning "only check that the path exists",
/// skipping a full content read - the "existent-probe shortcut" of §4.G.
pub const EXISTENCE_PROBE: &str = "\u{0}existence-probe\u{0}";

/// Resolves the current value backing a referenced mount name.
///
/// Mount resolution is host/OS-specific and explicitly out of scope here -
/// it is an external collaborator; the default resolver always reports
/// mounts as unset, which is the correct behavior on a host with no mount
/// namespace of its own.
pub trait MountResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// A `MountResolver` that never finds a mount - the sane default off-host.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMountResolver;

impl MountResolver for NoopMountResolver {
    fn resolve(&self, _name: &str) -> Option<String> {
        None
    }
}

/// How a path was observed: as a file (expects a content hash) or a
/// directory (expects a membership fingerprint over canonically ordered
/// entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathObservationKind {
    File,
    Directory,
}

/// One observed filesystem path and the value recorded when the descriptor
/// containing it was published (used only for mismatch diagnostics - the
/// derived fingerprint always rehashes the *current* value on disk).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathObservation {
    pub path: PathBuf,
    pub kind: PathObservationKind,
    pub expected_hash: String,
}

/// One observed environment variable and its expected canonicalized value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EnvObservation {
    pub name: String,
    pub expected_value: Option<String>,
}

/// One observed mount name and its expected canonicalized path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MountObservation {
    pub name: String,
    pub expected_path: Option<String>,
}

/// Three ordered, deduplicated sequences of observed graph inputs.
///
/// Immutable once constructed; its content fingerprint is reproducible
/// bit-for-bit from these sorted sequences and a supplied parent
/// fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphInputDescriptor {
    paths: Vec<PathObservation>,
    env_vars: Vec<EnvObservation>,
    mounts: Vec<MountObservation>,
}

impl GraphInputDescriptor {
    pub fn new(
        mut paths: Vec<PathObservation>,
        mut env_vars: Vec<EnvObservation>,
        mut mounts: Vec<MountObservation>,
    ) -> Self {
        paths.sort();
        paths.dedup();
        env_vars.sort();
        env_vars.dedup();
        mounts.sort();
        mounts.dedup();
        Self { paths, env_vars, mounts }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.env_vars.is_empty() && self.mounts.is_empty()
    }

    pub fn paths(&self) -> &[PathObservation] {
        &self.paths
    }

    pub fn env_vars(&self) -> &[EnvObservation] {
        &self.env_vars
    }

    pub fn mounts(&self) -> &[MountObservation] {
        &self.mounts
    }

    /// Observations present in `self` but not in `other`, used by the
    /// publish path's conflict-resolution loop.
    fn subtract(&self, other: &GraphInputDescriptor) -> GraphInputDescriptor {
        GraphInputDescriptor {
            paths: self.paths.iter().filter(|p| !other.paths.contains(p)).cloned().collect(),
            env_vars: self
                .env_vars
                .iter()
                .filter(|e| !other.env_vars.contains(e))
                .cloned()
                .collect(),
            mounts: self.mounts.iter().filter(|m| !other.mounts.contains(m)).cloned().collect(),
        }
    }

    /// Stable text encoding used as the `GraphInputDescriptor` entry payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for p in &self.paths {
            out.push_str(&format!(
                "P\t{:?}\t{}\t{}\n",
                p.kind,
                p.path.display(),
                p.expected_hash
            ));
        }
        for e in &self.env_vars {
            out.push_str(&format!(
                "E\t{}\t{}\n",
                e.name,
                e.expected_value.as_deref().unwrap_or(NULL_MARKER)
            ));
        }
        for m in &self.mounts {
            out.push_str(&format!(
                "M\t{}\t{}\n",
                m.name,
                m.expected_path.as_deref().unwrap_or(NULL_MARKER)
            ));
        }
        out.into_bytes()
    }

    /// Inverse of [`encode`](Self::encode). Malformed lines are skipped
    /// rather than failing the whole decode - a corrupt single observation
    /// should not sink an entire chain hop.
    pub fn decode(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut paths = Vec::new();
        let mut env_vars = Vec::new();
        let mut mounts = Vec::new();

        for line in text.lines() {
            let mut parts = line.splitn(4, '\t');
            match parts.next() {
                Some("P") => {
                    if let (Some(kind), Some(path), Some(hash)) =
                        (parts.next(), parts.next(), parts.next())
                    {
                        let kind = if kind == "Directory" {
                            PathObservationKind::Directory
                        } else {
                            PathObservationKind::File
                        };
                        paths.push(PathObservation {
                            path: PathBuf::from(path),
                            kind,
                            expected_hash: hash.to_string(),
                        });
                    }
                }
                Some("E") => {
                    if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                        let expected_value =
                            if value == NULL_MARKER { None } else { Some(value.to_string()) };
                        env_vars.push(EnvObservation { name: name.to_string(), expected_value });
                    }
                }
                Some("M") => {
                    if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                        let expected_path =
                            if value == NULL_MARKER { None } else { Some(value.to_string()) };
                        mounts.push(MountObservation { name: name.to_string(), expected_path });
                    }
                }
                _ => {}
            }
        }

        Self::new(paths, env_vars, mounts)
    }
}

/// Per-hop bookkeeping surfaced back to the caller for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct HopHashReport {
    /// Paths whose content could not be hashed this hop (capped at
    /// `FAILED_HASH_LIMIT`); such paths are skipped when deriving the
    /// fingerprint rather than failing the hop outright.
    pub failed_hashes: Vec<PathBuf>,
}

fn actual_path_value(obs: &PathObservation) -> std::io::Result<String> {
    if !obs.path.exists() {
        return Ok(ABSENT_FILE_SENTINEL.to_string());
    }
    if obs.expected_hash == EXISTENCE_PROBE {
        return Ok("\u{0}exists\u{0}".to_string());
    }
    match obs.kind {
        PathObservationKind::File => {
            let data = std::fs::read(&obs.path)?;
            Ok(ContentHash::from_data(&data).into_inner())
        }
        PathObservationKind::Directory => {
            let mut names: Vec<String> = std::fs::read_dir(&obs.path)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            Ok(ContentHash::from_data(names.join("\u{0}").as_bytes()).into_inner())
        }
    }
}

fn normalize_env_value(value: String) -> String {
    value.trim().to_lowercase()
}

/// Hash `paths` in chunks of at most `MAX_CONCURRENT_PATH_HASHES` scoped
/// worker threads, preserving `paths`' order in the returned `Vec` (§5's
/// bounded-concurrency requirement, without pulling an async runtime or a
/// work-stealing crate into an otherwise synchronous store-facing crate).
fn hash_paths_bounded(paths: &[PathObservation]) -> Vec<std::io::Result<String>> {
    let mut results = Vec::with_capacity(paths.len());
    for chunk in paths.chunks(MAX_CONCURRENT_PATH_HASHES) {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|obs| scope.spawn(|| actual_path_value(obs)))
                .collect();
            for handle in handles {
                results.push(handle.join().expect("path-hash worker thread panicked"));
            }
        });
    }
    results
}

/// Derive the next fingerprint from `parent` and the current values of
/// `descriptor`'s observations. An empty descriptor hashes only the parent
/// salt - the chain's own boundary case.
fn derive_fingerprint(
    parent: &ContentHash,
    descriptor: &GraphInputDescriptor,
    mounts: &dyn MountResolver,
) -> (ContentHash, HopHashReport) {
    let mut report = HopHashReport::default();

    if descriptor.is_empty() {
        return (ContentHash::from_data(parent.as_str().as_bytes()), report);
    }

    let mut combined = Vec::new();
    combined.extend_from_slice(parent.as_str().as_bytes());

    let mut path_group = SALT_PATH_OBSERVATIONS.as_bytes().to_vec();
    let hashed = hash_paths_bounded(descriptor.paths());
    for (obs, result) in descriptor.paths().iter().zip(hashed) {
        match result {
            Ok(value) => {
                path_group.extend_from_slice(obs.path.to_string_lossy().as_bytes());
                path_group.push(0);
                path_group.extend_from_slice(value.as_bytes());
                path_group.push(0);
            }
            Err(_) => {
                if report.failed_hashes.len() < FAILED_HASH_LIMIT {
                    report.failed_hashes.push(obs.path.clone());
                }
            }
        }
    }
    combined.extend_from_slice(ContentHash::from_data(&path_group).as_str().as_bytes());

    let mut env_group = SALT_ENVIRONMENT_VARIABLES.as_bytes().to_vec();
    for obs in descriptor.env_vars() {
        let value = std::env::var(&obs.name).ok().map(normalize_env_value);
        env_group.extend_from_slice(obs.name.as_bytes());
        env_group.push(0);
        env_group.extend_from_slice(value.as_deref().unwrap_or(NULL_MARKER).as_bytes());
        env_group.push(0);
    }
    combined.extend_from_slice(ContentHash::from_data(&env_group).as_str().as_bytes());

    let mut mount_group = SALT_MOUNTS.as_bytes().to_vec();
    for obs in descriptor.mounts() {
        let value = mounts.resolve(&obs.name);
        mount_group.extend_from_slice(obs.name.as_bytes());
        mount_group.push(0);
        mount_group.extend_from_slice(value.as_deref().unwrap_or(NULL_MARKER).as_bytes());
        mount_group.push(0);
    }
    combined.extend_from_slice(ContentHash::from_data(&mount_group).as_str().as_bytes());

    (ContentHash::from_data(&combined), report)
}

/// Errors from walking a fingerprint chain. `Miss` and `Hit` are not errors -
/// they are the two arms of a successful [`LookupOutcome`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("exceeded max hop count while walking fingerprint chain")]
    ExceededMaxHopCount,
    #[error("failed to get fingerprint entry: {0}")]
    FailedGetFingerprintEntry(String),
    #[error("failed to hash graph input descriptor: {0}")]
    FailedHashPipGraphInputDescriptor(String),
    #[error("failed to load and deserialize content: {0}")]
    FailedLoadAndDeserializeContent(String),
    #[error("unexpected fingerprint entry kind")]
    UnexpectedFingerprintEntryKind,
}

/// Outcome of a successful [`lookup`] walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// A terminal `GraphDescriptor` was found; carries its opaque payload.
    Hit(Vec<u8>),
    /// The chain bottomed out at an absent fingerprint entry.
    Miss,
}

/// Full result of a [`lookup`] call, including diagnostics.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub outcome: LookupOutcome,
    /// Fingerprints visited, root first.
    pub chain: Vec<ContentHash>,
    /// Environment variable names whose current value differed from the
    /// value recorded when the traversed descriptor was published, capped
    /// at `INPUT_DIFFERENCES_LIMIT`. Only mismatches from the final
    /// unsuccessful hop are meaningful as "last recently mismatched inputs".
    pub mismatched_env_vars: Vec<String>,
    pub failed_hashes: Vec<PathBuf>,
}

/// Walk a fingerprint chain starting at `root`, looking for a terminal
/// `GraphDescriptor`. See `graphcache` module docs and spec §4.G.
pub fn lookup(
    store: &dyn FingerprintStore,
    root: &ContentHash,
    max_hop_count: u32,
    mounts: &dyn MountResolver,
) -> Result<LookupResult, ResolveError> {
    let mut current = root.clone();
    let mut chain = vec![current.clone()];
    let mut mismatched_env_vars = Vec::new();
    let mut failed_hashes = Vec::new();

    for _ in 0..max_hop_count {
        let entry = store
            .try_get(&current)
            .map_err(|e| ResolveError::FailedGetFingerprintEntry(e.to_string()))?;

        match entry {
            None => {
                return Ok(LookupResult {
                    outcome: LookupOutcome::Miss,
                    chain,
                    mismatched_env_vars,
                    failed_hashes,
                });
            }
            Some(Entry::GraphDescriptor(payload)) => {
                return Ok(LookupResult {
                    outcome: LookupOutcome::Hit(payload),
                    chain,
                    mismatched_env_vars,
                    failed_hashes,
                });
            }
            Some(Entry::GraphInputDescriptor(payload)) => {
                let descriptor = GraphInputDescriptor::decode(&payload);

                mismatched_env_vars.clear();
                for obs in descriptor.env_vars() {
                    if mismatched_env_vars.len() >= INPUT_DIFFERENCES_LIMIT {
                        break;
                    }
                    let actual = std::env::var(&obs.name).ok().map(normalize_env_value);
                    if actual != obs.expected_value {
                        mismatched_env_vars.push(obs.name.clone());
                    }
                }

                let (derived, report) = derive_fingerprint(&current, &descriptor, mounts);
                for path in report.failed_hashes {
                    if failed_hashes.len() >= FAILED_HASH_LIMIT {
                        break;
                    }
                    failed_hashes.push(path);
                }

                current = derived;
                chain.push(current.clone());
            }
        }
    }

    Err(ResolveError::ExceededMaxHopCount)
}

/// Outcome of a successful [`publish`] walk.
#[derive(Debug, Clone)]
pub enum PublishResult {
    /// The terminal descriptor was published at `fingerprint`.
    Published(ContentHash),
    /// The terminal publish lost to a conflicting terminal descriptor;
    /// caller decides how to reconcile.
    ConflictWithDescriptor(Vec<u8>),
}

/// Publish `descriptor_payload` as the terminal `GraphDescriptor` reached by
/// pinning `observed`'s current values starting at `root`, resolving
/// conflicting intermediate hops along the way. See spec §4.G "Store".
pub fn publish(
    store: &dyn FingerprintStore,
    root: &ContentHash,
    descriptor_payload: Vec<u8>,
    mut observed: GraphInputDescriptor,
    max_hop_count: u32,
    mounts: &dyn MountResolver,
) -> Result<PublishResult, ResolveError> {
    let mut current = root.clone();

    for _ in 0..max_hop_count {
        if observed.is_empty() {
            let outcome = store
                .try_store(&current, Entry::GraphDescriptor(descriptor_payload.clone()), true)
                .map_err(|e| ResolveError::FailedGetFingerprintEntry(e.to_string()))?;

            return match outcome {
                PublishOutcome::Published => Ok(PublishResult::Published(current)),
                PublishOutcome::RejectedDueToConflictingEntry(other_hash) => {
                    let conflicting = store
                        .try_load_content(&other_hash)
                        .map_err(|e| ResolveError::FailedLoadAndDeserializeContent(e.to_string()))?
                        .ok_or_else(|| {
                            ResolveError::FailedLoadAndDeserializeContent(
                                "conflicting entry vanished".to_string(),
                            )
                        })?;
                    match conflicting {
                        Entry::GraphDescriptor(payload) => {
                            Ok(PublishResult::ConflictWithDescriptor(payload))
                        }
                        Entry::GraphInputDescriptor(_) => Err(ResolveError::UnexpectedFingerprintEntryKind),
                    }
                }
            };
        }

        let outcome = store
            .try_store(&current, Entry::GraphInputDescriptor(observed.encode()), false)
            .map_err(|e| ResolveError::FailedGetFingerprintEntry(e.to_string()))?;

        match outcome {
            PublishOutcome::Published => {
                let (derived, _report) = derive_fingerprint(&current, &observed, mounts);
                current = derived;
                observed = GraphInputDescriptor::default();
            }
            PublishOutcome::RejectedDueToConflictingEntry(other_hash) => {
                let conflicting = store
                    .try_load_content(&other_hash)
                    .map_err(|e| ResolveError::FailedLoadAndDeserializeContent(e.to_string()))?
                    .ok_or_else(|| {
                        ResolveError::FailedLoadAndDeserializeContent(
                            "conflicting entry vanished".to_string(),
                        )
                    })?;

                match conflicting {
                    Entry::GraphDescriptor(payload) => {
                        return Ok(PublishResult::ConflictWithDescriptor(payload));
                    }
                    Entry::GraphInputDescriptor(payload) => {
                        let conflicting_descriptor = GraphInputDescriptor::decode(&payload);
                        let (derived, _report) =
                            derive_fingerprint(&current, &conflicting_descriptor, mounts);
                        current = derived;
                        observed = observed.subtract(&conflicting_descriptor);
                    }
                }
            }
        }
    }

    Err(ResolveError::ExceededMaxHopCount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CasConfig;
    use crate::fingerprint_store::FsFingerprintStore;
    use crate::store::FileStore;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> FsFingerprintStore {
        let blobs = FileStore::new(CasConfig::with_base_path(temp_dir.path())).unwrap();
        FsFingerprintStore::new(blobs).unwrap()
    }

    #[test]
    fn test_empty_descriptor_hashes_only_parent_salt() {
        let parent = ContentHash::from_data(b"parent");
        let empty = GraphInputDescriptor::default();
        let (derived, report) = derive_fingerprint(&parent, &empty, &NoopMountResolver);
        assert_eq!(derived, ContentHash::from_data(parent.as_str().as_bytes()));
        assert!(report.failed_hashes.is_empty());
    }

    #[test]
    fn test_max_hop_count_zero_exceeds_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let root = ContentHash::from_data(b"root");

        let result = lookup(&fps, &root, 0, &NoopMountResolver);
        assert!(matches!(result, Err(ResolveError::ExceededMaxHopCount)));
    }

    #[test]
    fn test_lookup_miss_on_absent_root() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let root = ContentHash::from_data(b"never stored");

        let result = lookup(&fps, &root, DEFAULT_MAX_HOP_COUNT, &NoopMountResolver).unwrap();
        assert_eq!(result.outcome, LookupOutcome::Miss);
        assert_eq!(result.chain, vec![root]);
    }

    #[test]
    fn test_two_hop_chain_hit_and_env_mismatch_miss() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);

        std::env::set_var("GRAPHCACHE_TEST_VAR", "v0");

        let root = ContentHash::from_data(b"F0");
        let descriptor = GraphInputDescriptor::new(
            vec![],
            vec![EnvObservation {
                name: "GRAPHCACHE_TEST_VAR".to_string(),
                expected_value: Some("v0".to_string()),
            }],
            vec![],
        );
        let (f1, _) = derive_fingerprint(&root, &descriptor, &NoopMountResolver);

        fps.try_store(&root, Entry::GraphInputDescriptor(descriptor.encode()), false)
            .unwrap();
        fps.try_store(&f1, Entry::GraphDescriptor(b"G".to_vec()), true)
            .unwrap();

        let hit = lookup(&fps, &root, DEFAULT_MAX_HOP_COUNT, &NoopMountResolver).unwrap();
        assert_eq!(hit.outcome, LookupOutcome::Hit(b"G".to_vec()));
        assert_eq!(hit.chain, vec![root.clone(), f1.clone()]);

        std::env::set_var("GRAPHCACHE_TEST_VAR", "v1");
        let miss = lookup(&fps, &root, DEFAULT_MAX_HOP_COUNT, &NoopMountResolver).unwrap();
        assert_eq!(miss.outcome, LookupOutcome::Miss);
        assert!(miss.mismatched_env_vars.contains(&"GRAPHCACHE_TEST_VAR".to_string()));

        std::env::remove_var("GRAPHCACHE_TEST_VAR");
    }

    #[test]
    fn test_publish_then_lookup_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let fps = store(&temp_dir);
        let root = ContentHash::from_data(b"publish-root");

        let observed = GraphInputDescriptor::new(
            vec![],
            vec![EnvObservation {
                name: "GRAPHCACHE_PUBLISH_VAR".to_string(),
                expected_value: None,
            }],
            vec![],
        );

        let result = publish(
            &fps,
            &root,
            b"published descriptor".to_vec(),
            observed,
            DEFAULT_MAX_HOP_COUNT,
            &NoopMountResolver,
        )
        .unwrap();
        let published_at = match result {
            PublishResult::Published(hash) => hash,
            other => panic!("expected Published, got {other:?}"),
        };
        assert_ne!(published_at, root);

        let looked_up = lookup(&fps, &root, DEFAULT_MAX_HOP_COUNT, &NoopMountResolver).unwrap();
        assert_eq!(looked_up.outcome, LookupOutcome::Hit(b"published descriptor".to_vec()));
    }

    #[test]
    fn test_traversal_is_pure_function_of_inputs() {
        let parent = ContentHash::from_data(b"repeat-parent");
        let descriptor = GraphInputDescriptor::new(
            vec![],
            vec![EnvObservation {
                name: "GRAPHCACHE_PURE_VAR".to_string(),
                expected_value: Some("x".to_string()),
            }],
            vec![],
        );
        std::env::set_var("GRAPHCACHE_PURE_VAR", "x");

        let (first, _) = derive_fingerprint(&parent, &descriptor, &NoopMountResolver);
        let (second, _) = derive_fingerprint(&parent, &descriptor, &NoopMountResolver);
        assert_eq!(first, second);

        std::env::remove_var("GRAPHCACHE_PURE_VAR");
    }

    #[test]
    fn test_path_hashing_spans_multiple_bounded_chunks_and_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let path_count = MAX_CONCURRENT_PATH_HASHES * 3 + 1;

        let mut paths = Vec::new();
        for i in 0..path_count {
            let file = temp_dir.path().join(format!("input-{i}.txt"));
            std::fs::write(&file, format!("contents-{i}")).unwrap();
            paths.push(PathObservation {
                path: file,
                kind: PathObservationKind::File,
                expected_hash: String::new(),
            });
        }
        // One path that does not exist on disk - the absent-file sentinel
        // path, not a hashing failure, and must not be skipped.
        paths.push(PathObservation {
            path: temp_dir.path().join("missing.txt"),
            kind: PathObservationKind::File,
            expected_hash: String::new(),
        });

        let descriptor = GraphInputDescriptor::new(paths.clone(), vec![], vec![]);
        let parent = ContentHash::from_data(b"bounded-chunk-parent");

        let (first, report) = derive_fingerprint(&parent, &descriptor, &NoopMountResolver);
        assert!(report.failed_hashes.is_empty(), "no path here should fail to hash");

        // Rerunning with the same on-disk contents must reproduce the same
        // fingerprint bit-for-bit, regardless of how the per-path hashing
        // work was chunked across worker threads.
        let (second, _) = derive_fingerprint(&parent, &descriptor, &NoopMountResolver);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unreadable_path_is_skipped_and_tallied_as_failed_hash() {
        let temp_dir = TempDir::new().unwrap();
        let dir_as_file = temp_dir.path().join("not-a-file");
        std::fs::create_dir(&dir_as_file).unwrap();

        // Declared as a `File` observation but is actually a directory on
        // disk - `std::fs::read` on it fails, so it must be tallied in
        // `failed_hashes` and skipped from the derived fingerprint rather
        // than aborting the whole hop.
        let paths = vec![PathObservation {
            path: dir_as_file.clone(),
            kind: PathObservationKind::File,
            expected_hash: String::new(),
        }];
        let descriptor = GraphInputDescriptor::new(paths, vec![], vec![]);
        let parent = ContentHash::from_data(b"unreadable-parent");

        let (derived, report) = derive_fingerprint(&parent, &descriptor, &NoopMountResolver);
        assert_eq!(report.failed_hashes, vec![dir_as_file]);

        let empty = GraphInputDescriptor::default();
        let (derived_with_no_paths, _) = derive_fingerprint(&parent, &empty, &NoopMountResolver);
        // A skipped path still contributes the per-group salt, so the
        // derived fingerprint differs from the zero-inputs case - only the
        // failed path itself is omitted from the path group's contents.
        assert_ne!(derived, derived_with_no_paths);
    }
}

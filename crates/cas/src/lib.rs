//! Content addressable storage (CAS) for distbuild.
//!
//! A shared crate used by the master's fingerprint store and graph-cache
//! resolver, and by anything else in the workspace that needs write-once,
//! hash-addressed blob storage:
//!
//! - **distbuild** (master): stores graph/input descriptor payloads, resolves
//!   fingerprint chains.
//! - **distbuild** (worker): reads content by hash to materialize build
//!   inputs.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cas::{FileStore, ContentStore, CasConfig};
//!
//! // Create from environment (reads DISTBUILD_CAS_PATH)
//! let config = CasConfig::from_env().unwrap();
//! let store = FileStore::new(config).unwrap();
//!
//! // Or at a specific path
//! let store = FileStore::at_path("/tank/distbuild/cas").unwrap();
//!
//! // Store content
//! let hash = store.store(b"Hello, World!", "text/plain").unwrap();
//! println!("Stored as: {}", hash);
//!
//! // Retrieve content
//! if let Some(data) = store.retrieve(&hash).unwrap() {
//!     println!("Got {} bytes", data.len());
//! }
//!
//! // Get filesystem path (for external tools)
//! if let Some(path) = store.path(&hash) {
//!     println!("File at: {}", path.display());
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `DISTBUILD_CAS_PATH`: Base path for storage (default: `~/.distbuild/cas`)
//! - `DISTBUILD_CAS_READONLY`: Set to "true" for read-only mode
//!
//! # NFS / Shared Storage
//!
//! CAS is designed for shared filesystems:
//! - Content is write-once (content-addressed = no conflicts)
//! - Writers (the master) create content
//! - Readers (workers) only need read access
//! - No locking required

pub mod config;
pub mod fingerprint_store;
pub mod graphcache;
pub mod hash;
pub mod metadata;
pub mod staging;
pub mod store;

// Re-exports for convenience
pub use config::CasConfig;
pub use fingerprint_store::{Entry, FingerprintStore, FsFingerprintStore, PublishOutcome};
pub use graphcache::{
    lookup, publish, EnvObservation, GraphInputDescriptor, LookupOutcome, LookupResult,
    MountObservation, MountResolver, NoopMountResolver, PathObservation, PathObservationKind,
    PublishResult, ResolveError, DEFAULT_MAX_HOP_COUNT,
};
pub use hash::{ContentHash, HashError};
pub use metadata::{CasMetadata, CasReference};
pub use staging::{CasAddress, SealResult, StagingChunk, StagingId};
pub use store::{ContentStore, FileStore};

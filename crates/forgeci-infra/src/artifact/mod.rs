//! Filesystem artifact storage with SQLite metadata.

mod fs;

pub use fs::FsArtifactStore;

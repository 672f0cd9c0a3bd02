//! Resumable upload core
//!
//! Clients declare a total length, then push the bytes as a series of
//! chunks, each carrying the offset it starts at. The server tracks one
//! session per target path and only ever advances it by whole, durably
//! stored chunks, so an interrupted client can ask for the committed offset
//! and resume from there.
//!
//! Storage is pluggable:
//! - [`LocalBackend`] appends byte ranges to a file on disk
//! - [`MultipartBackend`] maps each chunk onto one object-store part

pub mod backend;
pub mod coordinator;
pub mod keepalive;
pub mod multipart;
pub mod registry;
pub mod sequential;
pub mod types;

pub use backend::{BackendKind, ChunkStream, TargetInfo, UploadBackend};
pub use coordinator::{normalize_path, UploadCoordinator, UploadStatus};
pub use keepalive::KeepAliveGuard;
pub use multipart::MultipartBackend;
pub use registry::{SessionRegistry, SweeperHandle};
pub use sequential::LocalBackend;
pub use types::*;

//! Deskform State Management
//!
//! Persists what deskform knows about the remote objects it manages: the
//! identifier the vendor API assigned and the attributes last read back.
//!
//! # Overview
//!
//! - **StateFile**: all managed resources, with serial and lineage
//! - **StateBackend**: storage interface with locking
//! - **LocalBackend**: JSON file next to the configuration plus a lock file
//!
//! # Example
//!
//! ```ignore
//! use deskform_state::{LocalBackend, StateBackend};
//!
//! let backend = LocalBackend::new();
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply changes ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod local;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendError, BackendResult, StateBackend};
pub use local::LocalBackend;
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};

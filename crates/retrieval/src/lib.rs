//! Initial-snapshot retrieval engine for thin-clone PostgreSQL pools.
//!
//! This crate materializes a ready-to-clone PostgreSQL data directory from a
//! logical dump and registers the result with the copy-on-write storage pool.
//! The restore itself is orchestrated through an ephemeral PostgreSQL
//! container managed over the local container-engine socket.

pub mod config;
pub mod cont;
pub mod dbmarker;
pub mod engine;
pub mod health;
pub mod logging;
pub mod logical;
pub mod pool;
pub mod snapshot;
pub mod tools;

// Re-export key types for convenience
pub use config::{GlobalConfig, JobConfig};
pub use dbmarker::{DbMark, Marker};
pub use engine::{ContainerEngine, ContainerSpec, DockerEngine, ExecSpec};
pub use logical::{DbDefinition, DumpFormat, RestoreJob, RestoreOptions};
pub use pool::FsPool;
pub use snapshot::{CloneManager, LogicalSnapshotJob};

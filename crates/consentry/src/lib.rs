//! Consentry
//!
//! Consent governance and access control engine for student data. Third-party
//! services request field-level access, students approve, narrow, or deny, and
//! every read is checked against the resulting time-bounded grant. This crate
//! wires the workspace together: the SQLite storage backend, the engine
//! facade, configuration, and the admin CLI binary.

pub mod config;
pub mod engine;
pub mod error;
pub mod storage;

pub use config::{AuditConfig, EngineConfig};
pub use engine::{ConsentEngine, ExplanationField, ExplanationInput};
pub use error::{RootError, RootResult};
pub use storage::SqliteStore;

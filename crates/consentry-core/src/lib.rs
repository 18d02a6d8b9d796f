pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::*;
pub use memory::{MemoryAuditSink, MemoryStore};
pub use traits::*;
pub use types::*;
